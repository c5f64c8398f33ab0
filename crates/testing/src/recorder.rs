//! Call history shared between a test double and the test asserting on it

use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered log of backend calls
///
/// Cloning yields a handle onto the same log, so a test can keep one handle
/// while the backend under test owns another.
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<String>> {
        // a panicking test thread must not hide the log from the others
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one entry
    pub fn record(&self, call: impl Into<String>) {
        self.entries().push(call.into());
    }

    /// Snapshot of every entry so far
    pub fn calls(&self) -> Vec<String> {
        self.entries().clone()
    }

    /// Number of entries equal to `call`
    pub fn count(&self, call: &str) -> usize {
        self.entries().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_history() {
        let recorder = CallRecorder::new();
        let handle = recorder.clone();

        recorder.record("lockdb");
        handle.record("init");

        assert_eq!(recorder.calls(), vec!["lockdb", "init"]);
        assert_eq!(handle.count("init"), 1);

        handle.clear();
        assert!(recorder.is_empty());
    }
}
