//! In-memory backends with failure injection

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use stepwise_core::{Backend, BackendError, DiscreteBackend, Step};

use crate::recorder::CallRecorder;

fn injected(call: &str) -> BackendError {
    format!("injected {} failure", call).into()
}

/// [`Backend`] keeping its version in memory and logging every call
///
/// Log entries: `lockdb`, `unlockdb`, `init`, `drop`, `getversion`, and
/// `dostep` followed by the step rendered with its `Display` impl.
#[derive(Debug, Default)]
pub struct MockBackend {
    recorder: CallRecorder,
    version: AtomicU32,
    executed: Mutex<Vec<Step>>,
    lock_failures: AtomicUsize,
    fail_unlock: bool,
    fail_init: bool,
    fail_version: bool,
    fail_drop: bool,
    fail_steps: HashSet<u32>,
    step_delay: Option<Duration>,
    dropped: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing recorder instead of the backend's own
    pub fn with_recorder(mut self, recorder: CallRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Start at the given persisted version
    pub fn with_version(self, version: u32) -> Self {
        self.version.store(version, Ordering::SeqCst);
        self
    }

    /// Fail the first `times` lock calls
    pub fn fail_lock(self, times: usize) -> Self {
        self.lock_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_unlock(mut self) -> Self {
        self.fail_unlock = true;
        self
    }

    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn fail_version(mut self) -> Self {
        self.fail_version = true;
        self
    }

    pub fn fail_drop(mut self) -> Self {
        self.fail_drop = true;
        self
    }

    /// Fail every step that would record `version`
    pub fn fail_step_at(mut self, version: u32) -> Self {
        self.fail_steps.insert(version);
        self
    }

    /// Sleep inside every `do_step` before completing it
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn recorder(&self) -> &CallRecorder {
        &self.recorder
    }

    /// Recorded calls so far
    pub fn log(&self) -> Vec<String> {
        self.recorder.calls()
    }

    /// Version as last persisted by a successful step
    pub fn current_version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Steps that completed, in order
    pub fn executed(&self) -> Vec<Step> {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn lock(&self) -> Result<(), BackendError> {
        self.recorder.record("lockdb");
        let remaining = self.lock_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.lock_failures.store(remaining - 1, Ordering::SeqCst);
            return Err("migration is locked already".into());
        }
        Ok(())
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        self.recorder.record("unlockdb");
        if self.fail_unlock {
            return Err(injected("unlock"));
        }
        Ok(())
    }

    async fn init(&self) -> Result<(), BackendError> {
        self.recorder.record("init");
        if self.fail_init {
            return Err(injected("init"));
        }
        Ok(())
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        self.recorder.record("drop");
        if self.fail_drop {
            return Err(injected("drop"));
        }
        self.dropped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn version(&self) -> Result<u32, BackendError> {
        self.recorder.record("getversion");
        if self.fail_version {
            return Err(injected("version"));
        }
        Ok(self.current_version())
    }

    async fn do_step(&self, step: &Step) -> Result<(), BackendError> {
        self.recorder.record("dostep");
        self.recorder.record(step.to_string());

        if let Some(delay) = self.step_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_steps.contains(&step.version) {
            return Err(injected("step"));
        }

        self.version.store(step.version, Ordering::SeqCst);
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(step.clone());
        Ok(())
    }
}

/// [`DiscreteBackend`] exposing begin/exec/set-version/commit/rollback
///
/// Log entries: `begin`, `exec`, the query, `setversion`, the version,
/// `commit`, `rollback`, plus the lifecycle calls of [`MockBackend`].
#[derive(Debug, Default)]
pub struct MockDiscreteBackend {
    recorder: CallRecorder,
    version: AtomicU32,
    pending: Mutex<Option<u32>>,
    in_tx: AtomicBool,
    fail_begin: bool,
    fail_exec: bool,
    fail_set_version: bool,
    fail_commit: bool,
    fail_rollback: bool,
    slow_exec: Mutex<Option<Duration>>,
}

impl MockDiscreteBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, version: u32) -> Self {
        self.version.store(version, Ordering::SeqCst);
        self
    }

    pub fn fail_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn fail_exec(mut self) -> Self {
        self.fail_exec = true;
        self
    }

    pub fn fail_set_version(mut self) -> Self {
        self.fail_set_version = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    /// Make the next `exec` sleep for `delay` before returning
    pub fn slow_exec_once(self, delay: Duration) -> Self {
        *self.lock_slow_exec() = Some(delay);
        self
    }

    /// A transaction is open on the simulated connection
    pub fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }

    fn lock_slow_exec(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.slow_exec
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recorder(&self) -> &CallRecorder {
        &self.recorder
    }

    pub fn log(&self) -> Vec<String> {
        self.recorder.calls()
    }

    /// Committed version. Writes inside an open transaction are not visible.
    pub fn current_version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<u32>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DiscreteBackend for MockDiscreteBackend {
    async fn lock(&self) -> Result<(), BackendError> {
        self.recorder.record("lockdb");
        Ok(())
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        self.recorder.record("unlockdb");
        Ok(())
    }

    async fn init(&self) -> Result<(), BackendError> {
        self.recorder.record("init");
        Ok(())
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        self.recorder.record("drop");
        Ok(())
    }

    async fn version(&self) -> Result<u32, BackendError> {
        self.recorder.record("getversion");
        Ok(self.current_version())
    }

    async fn begin(&self) -> Result<(), BackendError> {
        self.recorder.record("begin");
        if self.fail_begin {
            return Err(injected("begin"));
        }
        if self.in_tx.swap(true, Ordering::SeqCst) {
            return Err("cannot start a transaction within a transaction".into());
        }
        Ok(())
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.recorder.record("commit");
        if self.fail_commit {
            return Err(injected("commit"));
        }
        self.in_tx.store(false, Ordering::SeqCst);
        if let Some(version) = self.pending().take() {
            self.version.store(version, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.recorder.record("rollback");
        self.in_tx.store(false, Ordering::SeqCst);
        self.pending().take();
        if self.fail_rollback {
            return Err(injected("rollback"));
        }
        Ok(())
    }

    async fn exec(&self, query: &str) -> Result<(), BackendError> {
        self.recorder.record("exec");
        self.recorder.record(query);
        let delay = self.lock_slow_exec().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_exec {
            return Err(injected("exec"));
        }
        Ok(())
    }

    async fn set_version(&self, version: u32) -> Result<(), BackendError> {
        self.recorder.record("setversion");
        self.recorder.record(version.to_string());
        if self.fail_set_version {
            return Err(injected("set version"));
        }
        if self.in_tx.load(Ordering::SeqCst) {
            *self.pending() = Some(version);
        } else {
            self.version.store(version, Ordering::SeqCst);
        }
        Ok(())
    }
}
