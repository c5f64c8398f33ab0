//! # stepwise-core: versioned schema migrations
//!
//! Brings a database's recorded schema version to a requested target by
//! executing apply or revert statements in order, under a lock, with optional
//! per-step transactions and timeouts.
//!
//! The crate never talks SQL itself. Databases plug in through [`Backend`]
//! (or [`DiscreteBackend`] wrapped in [`Transactional`]) and migrations come
//! from any [`Source`].
//!
//! ```rust,no_run
//! use stepwise_core::{run, DirSource, Mode, RunConfig};
//! # async fn example(backend: &dyn stepwise_core::Backend) -> stepwise_core::MigrateResult<()> {
//! let source = DirSource::new("migrations");
//! let report = run(backend, &source, RunConfig::new(Mode::ApplyAll)).await?;
//! println!("now at version {}", report.to);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod migration;
pub mod planner;
pub mod runner;
pub mod source;
pub mod step;

pub use backend::{Backend, DiscreteBackend, Transactional};
pub use config::{RunConfig, StepHook};
pub use error::{BackendError, MigrateError, MigrateResult};
pub use migration::{sort_and_validate, Migration, MIGRATION_DELIMITER};
pub use planner::{plan, Mode, Plan, PlanOptions};
pub use runner::{run, RunReport, Runner};
pub use source::{DirSource, EmbeddedSource, SliceSource, Source};
pub use step::{Direction, Step};
