//! Error types for the sqlx backends

use thiserror::Error;

pub type BackendsResult<T> = Result<T, BackendsError>;

#[derive(Error, Debug)]
pub enum BackendsError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Stored version {stored} is outside the supported range")]
    VersionOutOfRange { stored: i64 },

    #[error("Could not acquire database lock '{name}'")]
    LockUnavailable { name: String },

    #[error("Unsupported database URL '{url}'")]
    UnsupportedUrl { url: String },
}
