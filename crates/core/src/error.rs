use std::time::Duration;
use thiserror::Error;

/// Error type returned by backend and source implementations
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for migration runs
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Every way a migration run can fail, tagged with the phase that produced it
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("load: {source}")]
    Load { source: BackendError },

    #[error("duplicate migration number: {id} ({name})")]
    DuplicateMigration { id: u32, name: String },

    #[error("missing migration number: {want} (have {have})")]
    MissingMigration { want: u32, have: u32 },

    #[error("version out of bounds: {reason} (current {current}, target {target}, migrations {count})")]
    OutOfBounds {
        current: u32,
        target: i64,
        count: usize,
        reason: &'static str,
    },

    #[error("lock db: {source}")]
    Lock { source: BackendError },

    #[error("force unlock db: {source}")]
    ForceUnlock { source: BackendError },

    #[error("force lock db: {source}")]
    ForceLock { source: BackendError },

    #[error("init: {source}")]
    Init { source: BackendError },

    #[error("get version: {source}")]
    Version { source: BackendError },

    #[error("exec: step to version {version}: {source}")]
    Step { version: u32, source: BackendError },

    #[error("exec: step to version {version} timed out after {timeout:?}")]
    StepTimeout { version: u32, timeout: Duration },

    #[error("drop: {source}")]
    Drop { source: BackendError },

    #[error("unlock db: {source}")]
    Unlock { source: BackendError },
}

impl MigrateError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Configuration was rejected before touching the backend
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// The migration set itself is broken (duplicate or gap)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateMigration { .. } | Self::MissingMigration { .. }
        )
    }

    pub fn is_bounds(&self) -> bool {
        matches!(self, Self::OutOfBounds { .. })
    }

    /// A step exceeded the per-step timeout, as opposed to being rejected by the database
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StepTimeout { .. })
    }

    /// Name of the run phase in which the error was raised
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Load { .. } => "load",
            Self::DuplicateMigration { .. } | Self::MissingMigration { .. } => "validate",
            Self::OutOfBounds { .. } => "plan",
            Self::Lock { .. } | Self::ForceUnlock { .. } | Self::ForceLock { .. } => "lock",
            Self::Init { .. } => "init",
            Self::Version { .. } => "getversion",
            Self::Step { .. } | Self::StepTimeout { .. } => "exec",
            Self::Drop { .. } => "drop",
            Self::Unlock { .. } => "unlock",
        }
    }
}
