//! # stepwise-testing
//!
//! Test doubles and fixtures for code built on `stepwise-core`, plus a
//! conformance suite every [`Backend`](stepwise_core::Backend) implementation
//! should pass.
//!
//! - [`MockBackend`] / [`MockDiscreteBackend`]: in-memory backends with call
//!   logs and failure injection
//! - [`gen_migrations`] and [`FailingSource`]: migration fixtures
//! - [`BackendSuite`]: scenario-by-scenario call log checks

pub mod fixtures;
pub mod mock;
pub mod recorder;
pub mod suite;

pub use fixtures::{gen_migrations, gen_migrations_with, render_template, FailingSource};
pub use mock::{MockBackend, MockDiscreteBackend};
pub use recorder::CallRecorder;
pub use suite::{BackendSuite, Recorded};

use stepwise_core::{BackendError, MigrateError};

#[derive(thiserror::Error, Debug)]
pub enum TestError {
    #[error("Migration run failed: {0}")]
    Run(#[from] MigrateError),

    #[error("Backend call failed: {source}")]
    Backend { source: BackendError },

    #[error("Assertion failed: {message}")]
    Assertion { message: String },
}

impl TestError {
    pub fn backend(source: BackendError) -> Self {
        Self::Backend { source }
    }
}

pub type TestResult<T> = Result<T, TestError>;
