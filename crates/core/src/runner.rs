//! Migration runner - drives a planned run against a backend
//!
//! Order of operations for one run:
//!
//! 1. load and validate the migration set
//! 2. lock (unless disabled), with one force unlock+relock if requested
//! 3. init the version storage and read the current version
//! 4. plan and execute each step between the before/after hooks
//! 5. drop the version storage (drop mode only, after every step succeeded)
//! 6. unlock, on every exit path once the lock was taken

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::RunConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::migration::{sort_and_validate, Migration};
use crate::planner::{plan, Plan};
use crate::source::Source;
use crate::step::Step;

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Version before the run
    pub from: u32,
    /// Version after the run
    pub to: u32,
    /// Number of steps executed
    pub steps: usize,
    /// Total execution time in milliseconds
    pub elapsed_ms: u128,
}

/// Executes migrations from a [`Source`] against a [`Backend`]
pub struct Runner<'a> {
    backend: &'a dyn Backend,
    source: &'a dyn Source,
    config: RunConfig,
}

impl<'a> Runner<'a> {
    pub fn new(backend: &'a dyn Backend, source: &'a dyn Source, config: RunConfig) -> Self {
        Self {
            backend,
            source,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the configured mode to completion or first failure
    ///
    /// Dropping the returned future cancels whatever backend call is in flight.
    pub async fn run(&self) -> MigrateResult<RunReport> {
        self.config.validate()?;
        let start = Instant::now();

        let migrations = self.load()?;
        info!(
            mode = %self.config.mode,
            migrations = migrations.len(),
            "Starting migration run"
        );

        self.lock().await?;

        let result = self.run_locked(&migrations).await;

        if let Err(unlock_err) = self.unlock().await {
            match &result {
                Ok(_) => return Err(unlock_err),
                Err(run_err) => {
                    warn!(
                        "Unlock failed after run error '{}': {}",
                        run_err, unlock_err
                    );
                }
            }
        }

        let plan = result?;
        let report = RunReport {
            from: plan.from,
            to: plan.to,
            steps: plan.steps.len(),
            elapsed_ms: start.elapsed().as_millis(),
        };
        info!(
            from = report.from,
            to = report.to,
            steps = report.steps,
            elapsed_ms = report.elapsed_ms as u64,
            "Migration run finished"
        );
        Ok(report)
    }

    fn load(&self) -> MigrateResult<Vec<Migration>> {
        let migrations = self
            .source
            .load()
            .map_err(|source| MigrateError::Load { source })?;
        sort_and_validate(migrations)
    }

    async fn lock(&self) -> MigrateResult<()> {
        if self.config.no_database_lock {
            debug!("Database lock disabled, skipping");
            return Ok(());
        }

        let Err(err) = self.backend.lock().await else {
            debug!("Database lock acquired");
            return Ok(());
        };

        if !self.config.use_force {
            return Err(MigrateError::Lock { source: err });
        }

        warn!("Lock failed ({}), forcing unlock and retrying once", err);
        self.backend
            .unlock()
            .await
            .map_err(|source| MigrateError::ForceUnlock { source })?;
        self.backend
            .lock()
            .await
            .map_err(|source| MigrateError::ForceLock { source })?;

        debug!("Database lock acquired after forced unlock");
        Ok(())
    }

    async fn unlock(&self) -> MigrateResult<()> {
        if self.config.no_database_lock {
            return Ok(());
        }
        self.backend
            .unlock()
            .await
            .map_err(|source| MigrateError::Unlock { source })?;
        debug!("Database lock released");
        Ok(())
    }

    async fn run_locked(&self, migrations: &[Migration]) -> MigrateResult<Plan> {
        self.backend
            .init()
            .await
            .map_err(|source| MigrateError::Init { source })?;

        let current = self
            .backend
            .version()
            .await
            .map_err(|source| MigrateError::Version { source })?;

        let plan = plan(current, self.config.mode, self.config.plan_options(), migrations)?;
        info!(
            current = plan.from,
            target = plan.to,
            steps = plan.steps.len(),
            "Planned migration steps"
        );

        for step in &plan.steps {
            (self.config.before_step)(step);
            self.step(step).await?;
            (self.config.after_step)(step);
        }

        if plan.drop_storage {
            self.backend
                .drop_storage()
                .await
                .map_err(|source| MigrateError::Drop { source })?;
            info!("Version storage dropped");
        }

        Ok(plan)
    }

    async fn step(&self, step: &Step) -> MigrateResult<()> {
        debug!(version = step.version, disable_tx = step.disable_tx, "Executing step");
        let start = Instant::now();

        let result = match self.config.step_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, self.backend.do_step(step))
                .await
                .map_err(|_| MigrateError::StepTimeout {
                    version: step.version,
                    timeout,
                })?,
            None => self.backend.do_step(step).await,
        };

        result.map_err(|source| MigrateError::Step {
            version: step.version,
            source,
        })?;

        info!(
            version = step.version,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Step applied"
        );
        Ok(())
    }
}

/// Run migrations from `source` against `backend` with the given configuration
pub async fn run(
    backend: &dyn Backend,
    source: &dyn Source,
    config: RunConfig,
) -> MigrateResult<RunReport> {
    Runner::new(backend, source, config).run().await
}
