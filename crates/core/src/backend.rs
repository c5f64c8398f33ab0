//! Backend capability traits
//!
//! The runner only ever talks to a database through [`Backend`]. Databases
//! that cannot execute a step and record its version in one call implement
//! [`DiscreteBackend`] instead and are wrapped in [`Transactional`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::error::BackendError;
use crate::step::Step;

/// Capabilities the runner needs from a database
#[async_trait]
pub trait Backend: Send + Sync {
    /// Acquire cross-process mutual exclusion. A no-op is a valid implementation.
    async fn lock(&self) -> Result<(), BackendError>;

    /// Release the lock taken by [`Backend::lock`]
    async fn unlock(&self) -> Result<(), BackendError>;

    /// Idempotently create the version-tracking storage
    async fn init(&self) -> Result<(), BackendError>;

    /// Remove the version-tracking storage
    async fn drop_storage(&self) -> Result<(), BackendError>;

    /// Current persisted version, 0 when nothing was ever recorded
    async fn version(&self) -> Result<u32, BackendError>;

    /// Execute the step query and persist `step.version` as one logical operation
    async fn do_step(&self, step: &Step) -> Result<(), BackendError>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn lock(&self) -> Result<(), BackendError> {
        (**self).lock().await
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        (**self).unlock().await
    }

    async fn init(&self) -> Result<(), BackendError> {
        (**self).init().await
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        (**self).drop_storage().await
    }

    async fn version(&self) -> Result<u32, BackendError> {
        (**self).version().await
    }

    async fn do_step(&self, step: &Step) -> Result<(), BackendError> {
        (**self).do_step(step).await
    }
}

/// Databases exposing separate exec / set-version / transaction primitives
#[async_trait]
pub trait DiscreteBackend: Send + Sync {
    async fn lock(&self) -> Result<(), BackendError>;
    async fn unlock(&self) -> Result<(), BackendError>;
    async fn init(&self) -> Result<(), BackendError>;
    async fn drop_storage(&self) -> Result<(), BackendError>;
    async fn version(&self) -> Result<u32, BackendError>;

    async fn begin(&self) -> Result<(), BackendError>;
    async fn commit(&self) -> Result<(), BackendError>;
    async fn rollback(&self) -> Result<(), BackendError>;

    /// Execute an opaque statement body
    async fn exec(&self, query: &str) -> Result<(), BackendError>;

    /// Record `version` as the current schema version
    async fn set_version(&self, version: u32) -> Result<(), BackendError>;
}

/// Adapts a [`DiscreteBackend`] to [`Backend`] by composing its primitives
///
/// With `disable_tx` the query and the version write run back to back.
/// Otherwise both run between `begin` and `commit`, and any failure in
/// between triggers a `rollback` before the original error is returned.
///
/// A step future dropped between `begin` and `commit` (per-step timeout,
/// cancelled run) leaves the transaction open on the connection. The adapter
/// remembers that and issues the missing `rollback` before its next call.
#[derive(Debug)]
pub struct Transactional<B> {
    inner: B,
    open_tx: AtomicBool,
}

impl<B: DiscreteBackend> Transactional<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            open_tx: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    /// A transaction was begun and never committed or rolled back
    pub fn has_open_transaction(&self) -> bool {
        self.open_tx.load(Ordering::SeqCst)
    }

    /// Roll back a transaction abandoned by a cancelled step
    async fn recover(&self) {
        if !self.has_open_transaction() {
            return;
        }
        warn!("Rolling back transaction left open by an interrupted step");
        if let Err(e) = self.inner.rollback().await {
            warn!("Rollback of interrupted transaction failed: {}", e);
        }
        self.open_tx.store(false, Ordering::SeqCst);
    }

    async fn exec_and_record(&self, step: &Step) -> Result<(), BackendError> {
        self.inner.exec(&step.query).await?;
        self.inner.set_version(step.version).await
    }
}

#[async_trait]
impl<B: DiscreteBackend> Backend for Transactional<B> {
    async fn lock(&self) -> Result<(), BackendError> {
        self.recover().await;
        self.inner.lock().await
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        self.recover().await;
        self.inner.unlock().await
    }

    async fn init(&self) -> Result<(), BackendError> {
        self.recover().await;
        self.inner.init().await
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        self.recover().await;
        self.inner.drop_storage().await
    }

    async fn version(&self) -> Result<u32, BackendError> {
        self.recover().await;
        self.inner.version().await
    }

    async fn do_step(&self, step: &Step) -> Result<(), BackendError> {
        self.recover().await;
        if step.disable_tx {
            return self.exec_and_record(step).await;
        }

        // set before awaiting so a cancelled `begin` is still rolled back
        self.open_tx.store(true, Ordering::SeqCst);
        if let Err(e) = self.inner.begin().await {
            self.open_tx.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let result = match self.exec_and_record(step).await {
            Ok(()) => self.inner.commit().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(rollback_err) = self.inner.rollback().await {
                warn!(
                    version = step.version,
                    "Rollback after failed step also failed: {}", rollback_err
                );
            }
            self.open_tx.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.open_tx.store(false, Ordering::SeqCst);
        Ok(())
    }
}
