//! Run configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MigrateError, MigrateResult};
use crate::planner::{Mode, PlanOptions};
use crate::step::Step;

/// Callback invoked around every executed step
pub type StepHook = Arc<dyn Fn(&Step) + Send + Sync>;

/// Options for a single migration run
#[derive(Clone)]
pub struct RunConfig {
    /// How the target version is computed
    pub mode: Mode,
    /// Upper bound for a single step. `None` or zero means no limit.
    pub timeout: Option<Duration>,
    /// Skip backend lock/unlock entirely
    pub no_database_lock: bool,
    /// Run every step outside of a transaction
    pub disable_tx: bool,
    /// On a failed lock, unlock once and retry. Use with caution.
    pub use_force: bool,
    /// Apply-revert-apply each migration going up, revert-apply-revert going down
    pub zig_zag: bool,
    /// Invoked right before each step
    pub before_step: StepHook,
    /// Invoked right after each successful step
    pub after_step: StepHook,
}

impl RunConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            timeout: None,
            no_database_lock: false,
            disable_tx: false,
            use_force: false,
            zig_zag: false,
            before_step: Arc::new(|_| {}),
            after_step: Arc::new(|_| {}),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_lock(mut self) -> Self {
        self.no_database_lock = true;
        self
    }

    pub fn with_disable_tx(mut self, disable_tx: bool) -> Self {
        self.disable_tx = disable_tx;
        self
    }

    pub fn with_force(mut self, use_force: bool) -> Self {
        self.use_force = use_force;
        self
    }

    pub fn with_zig_zag(mut self, zig_zag: bool) -> Self {
        self.zig_zag = zig_zag;
        self
    }

    pub fn before_step<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Step) + Send + Sync + 'static,
    {
        self.before_step = Arc::new(hook);
        self
    }

    pub fn after_step<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Step) + Send + Sync + 'static,
    {
        self.after_step = Arc::new(hook);
        self
    }

    /// Reject configurations that can never run
    pub fn validate(&self) -> MigrateResult<()> {
        match self.mode {
            Mode::ApplyN(0) | Mode::RevertN(0) => Err(MigrateError::config(format!(
                "num must be greater than 0 for mode {}",
                self.mode
            ))),
            _ => Ok(()),
        }
    }

    /// Effective per-step timeout
    pub fn step_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    pub(crate) fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            zig_zag: self.zig_zag,
            disable_tx: self.disable_tx,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("no_database_lock", &self.no_database_lock)
            .field("disable_tx", &self.disable_tx)
            .field("use_force", &self.use_force)
            .field("zig_zag", &self.zig_zag)
            .finish_non_exhaustive()
    }
}
