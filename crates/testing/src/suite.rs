//! Backend conformance suite
//!
//! Every scenario runs a real migration against the backend under test through
//! a [`Recorded`] wrapper and compares the resulting call log with the exact
//! sequence a correct runner and backend must produce.
//!
//! ```rust,no_run
//! use stepwise_testing::{BackendSuite, MockBackend};
//!
//! # async fn example() -> stepwise_testing::TestResult<()> {
//! let backend = MockBackend::new();
//! BackendSuite::new(&backend).run_all().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use tracing::debug;

use stepwise_core::{run, Backend, BackendError, Migration, Mode, RunConfig, SliceSource, Step};

use crate::fixtures::{
    gen_migrations_with, render_template, DEFAULT_APPLY_TEMPLATE, DEFAULT_REVERT_TEMPLATE,
};
use crate::recorder::CallRecorder;
use crate::{TestError, TestResult};

const MIGRATION_COUNT: u32 = 5;

/// Logs every call in the conformance format before delegating
pub struct Recorded<'a> {
    inner: &'a dyn Backend,
    recorder: CallRecorder,
}

impl<'a> Recorded<'a> {
    pub fn new(inner: &'a dyn Backend) -> Self {
        Self {
            inner,
            recorder: CallRecorder::new(),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.recorder.calls()
    }
}

#[async_trait]
impl Backend for Recorded<'_> {
    async fn lock(&self) -> Result<(), BackendError> {
        self.recorder.record("lockdb");
        self.inner.lock().await
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        self.recorder.record("unlockdb");
        self.inner.unlock().await
    }

    async fn init(&self) -> Result<(), BackendError> {
        self.recorder.record("init");
        self.inner.init().await
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        self.recorder.record("drop");
        self.inner.drop_storage().await
    }

    async fn version(&self) -> Result<u32, BackendError> {
        self.recorder.record("getversion");
        self.inner.version().await
    }

    async fn do_step(&self, step: &Step) -> Result<(), BackendError> {
        self.recorder.record("dostep");
        self.recorder.record(step.to_string());
        self.inner.do_step(step).await
    }
}

fn step_entry(version: u32, query: &str) -> String {
    Step {
        version,
        query: query.to_string(),
        disable_tx: false,
    }
    .to_string()
}

fn assert_log(scenario: &str, have: Vec<String>, want: Vec<String>) -> TestResult<()> {
    if have != want {
        return Err(TestError::Assertion {
            message: format!("{}:\nhave {:?}\nwant {:?}", scenario, have, want),
        });
    }
    Ok(())
}

/// Conformance scenarios for a [`Backend`] implementation
///
/// Scenarios expect the backend to start at version 0 and leave it there
/// afterwards, so they can run back to back against one database.
pub struct BackendSuite<'a> {
    backend: &'a dyn Backend,
    apply_template: String,
    revert_template: String,
    clean_migration_template: Option<String>,
    clean_test: String,
    skip_cleanup: bool,
}

impl<'a> BackendSuite<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            apply_template: DEFAULT_APPLY_TEMPLATE.to_string(),
            revert_template: DEFAULT_REVERT_TEMPLATE.to_string(),
            clean_migration_template: None,
            clean_test: "SELECT 0;".to_string(),
            skip_cleanup: false,
        }
    }

    /// Query templates for generated migrations, with `{test}` and `{n}` placeholders
    pub fn with_templates(mut self, apply: impl Into<String>, revert: impl Into<String>) -> Self {
        self.apply_template = apply.into();
        self.revert_template = revert.into();
        self
    }

    /// Per-migration cleanup query, run in reverse after every scenario
    pub fn with_clean_migration(mut self, template: impl Into<String>) -> Self {
        self.clean_migration_template = Some(template.into());
        self
    }

    /// Final cleanup query, recorded at version 0
    pub fn with_clean_test(mut self, query: impl Into<String>) -> Self {
        self.clean_test = query.into();
        self
    }

    pub fn skip_cleanup(mut self) -> Self {
        self.skip_cleanup = true;
        self
    }

    /// Run every scenario in order, stopping at the first failure
    pub async fn run_all(&self) -> TestResult<()> {
        self.apply_all().await?;
        self.apply_one().await?;
        self.apply_all_when_full().await?;
        self.revert_one().await?;
        self.revert_all_when_empty().await?;
        self.revert_all().await?;
        self.redo().await?;
        self.drop_all().await?;
        Ok(())
    }

    pub async fn apply_all(&self) -> TestResult<()> {
        let migs = self.gen_migrations("apply_all");

        let mut want = vec!["lockdb", "init", "getversion"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for m in &migs {
            want.push("dostep".to_string());
            want.push(step_entry(m.id, &m.apply));
        }
        want.push("unlockdb".to_string());

        let have = self.recorded_run(&migs, Mode::ApplyAll).await;
        self.finish("apply_all", have, want).await
    }

    pub async fn apply_one(&self) -> TestResult<()> {
        let migs = self.gen_migrations("apply_one");
        self.prepare(&migs[..3]).await?;

        let want = vec![
            "lockdb".to_string(),
            "init".to_string(),
            "getversion".to_string(),
            "dostep".to_string(),
            step_entry(4, &migs[3].apply),
            "unlockdb".to_string(),
        ];

        let have = self.recorded_run(&migs, Mode::ApplyN(1)).await;
        self.finish("apply_one", have, want).await
    }

    pub async fn apply_all_when_full(&self) -> TestResult<()> {
        let migs = self.gen_migrations("apply_all_when_full");
        self.prepare(&migs).await?;

        let want = vec!["lockdb", "init", "getversion", "unlockdb"]
            .into_iter()
            .map(String::from)
            .collect();

        let have = self.recorded_run(&migs, Mode::ApplyAll).await;
        self.finish("apply_all_when_full", have, want).await
    }

    pub async fn revert_one(&self) -> TestResult<()> {
        let migs = self.gen_migrations("revert_one");
        self.prepare(&migs[..3]).await?;

        let want = vec![
            "lockdb".to_string(),
            "init".to_string(),
            "getversion".to_string(),
            "dostep".to_string(),
            step_entry(2, &migs[2].revert),
            "unlockdb".to_string(),
        ];

        let have = self.recorded_run(&migs, Mode::RevertN(1)).await;
        self.finish("revert_one", have, want).await
    }

    pub async fn revert_all_when_empty(&self) -> TestResult<()> {
        let migs = self.gen_migrations("revert_all_when_empty");

        let want = vec!["lockdb", "init", "getversion", "unlockdb"]
            .into_iter()
            .map(String::from)
            .collect();

        let have = self.recorded_run(&migs, Mode::RevertAll).await;
        self.finish("revert_all_when_empty", have, want).await
    }

    pub async fn revert_all(&self) -> TestResult<()> {
        let migs = self.gen_migrations("revert_all");
        self.prepare(&migs).await?;

        let mut want = vec!["lockdb", "init", "getversion"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for m in migs.iter().rev() {
            want.push("dostep".to_string());
            want.push(step_entry(m.id - 1, &m.revert));
        }
        want.push("unlockdb".to_string());

        let have = self.recorded_run(&migs, Mode::RevertAll).await;
        self.finish("revert_all", have, want).await
    }

    pub async fn redo(&self) -> TestResult<()> {
        let migs = self.gen_migrations("redo");
        self.prepare(&migs[..3]).await?;

        let want = vec![
            "lockdb".to_string(),
            "init".to_string(),
            "getversion".to_string(),
            "dostep".to_string(),
            step_entry(2, &migs[2].revert),
            "dostep".to_string(),
            step_entry(3, &migs[2].apply),
            "unlockdb".to_string(),
        ];

        let have = self.recorded_run(&migs, Mode::Redo).await;
        self.finish("redo", have, want).await
    }

    pub async fn drop_all(&self) -> TestResult<()> {
        let migs = self.gen_migrations("drop");
        self.prepare(&migs).await?;

        let mut want = vec!["lockdb", "init", "getversion"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for m in migs.iter().rev() {
            want.push("dostep".to_string());
            want.push(step_entry(m.id - 1, &m.revert));
        }
        want.push("drop".to_string());
        want.push("unlockdb".to_string());

        let have = self.recorded_run(&migs, Mode::Drop).await;
        self.finish("drop", have, want).await
    }

    fn gen_migrations(&self, test_name: &str) -> Vec<Migration> {
        gen_migrations_with(
            MIGRATION_COUNT,
            test_name,
            &self.apply_template,
            &self.revert_template,
        )
    }

    /// Bring the backend to the state of `migs` without recording anything
    async fn prepare(&self, migs: &[Migration]) -> TestResult<()> {
        let source = SliceSource::new(migs.to_vec());
        run(self.backend, &source, RunConfig::new(Mode::ApplyAll)).await?;
        Ok(())
    }

    async fn recorded_run(
        &self,
        migs: &[Migration],
        mode: Mode,
    ) -> TestResult<Vec<String>> {
        let recorded = Recorded::new(self.backend);
        let source = SliceSource::new(migs.to_vec());
        run(&recorded, &source, RunConfig::new(mode)).await?;
        Ok(recorded.log())
    }

    async fn finish(
        &self,
        scenario: &str,
        have: TestResult<Vec<String>>,
        want: Vec<String>,
    ) -> TestResult<()> {
        let outcome = have.and_then(|have| assert_log(scenario, have, want));
        let cleanup = self.cleanup(scenario).await;
        outcome?;
        cleanup
    }

    /// Undo whatever a scenario left behind and reset the recorded version to 0
    async fn cleanup(&self, test_name: &str) -> TestResult<()> {
        if self.skip_cleanup {
            return Ok(());
        }
        debug!(scenario = test_name, "Cleaning up after scenario");

        // the drop scenario removes the version storage
        self.backend.init().await.map_err(TestError::backend)?;

        if let Some(template) = &self.clean_migration_template {
            for n in (1..=MIGRATION_COUNT).rev() {
                let step = Step {
                    version: n - 1,
                    query: render_template(template, test_name, n),
                    disable_tx: false,
                };
                self.backend.do_step(&step).await.map_err(TestError::backend)?;
            }
        }

        let step = Step {
            version: 0,
            query: self.clean_test.clone(),
            disable_tx: false,
        };
        self.backend.do_step(&step).await.map_err(TestError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockBackend;

    #[tokio::test]
    async fn test_suite_passes_against_mock() {
        let backend = MockBackend::new();
        BackendSuite::new(&backend).run_all().await.unwrap();
        assert_eq!(backend.current_version(), 0);
    }

    #[tokio::test]
    async fn test_recorded_logs_before_delegating() {
        let backend = MockBackend::new().fail_init();
        let recorded = Recorded::new(&backend);

        assert!(recorded.init().await.is_err());
        assert_eq!(recorded.log(), vec!["init"]);
    }

    #[tokio::test]
    async fn test_mismatched_log_is_reported() {
        let err = assert_log(
            "example",
            vec!["lockdb".to_string()],
            vec!["lockdb".to_string(), "unlockdb".to_string()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("example"));
    }
}
