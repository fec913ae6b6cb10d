//! Fixed-capacity pool of anonymous permits.
//!
//! The hub uses two of these: one caps how many labs may be under
//! construction at once, the other caps how many labs may be outstanding
//! in total. Unlike a plain `tokio::sync::Semaphore` permit, a claim here is
//! not tied to a value's lifetime: [`CountingSemaphore::claim`] removes a
//! permit and [`CountingSemaphore::release`] puts one back, so the two calls
//! may happen in different tasks.

use crate::error::{HubError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A counting semaphore with explicit claim/release.
#[derive(Debug, Clone)]
pub struct CountingSemaphore {
    inner: Arc<Semaphore>,
    capacity: usize,
}

impl CountingSemaphore {
    /// Create a semaphore holding exactly `n` permits.
    pub fn new(n: usize) -> Self {
        Self {
            inner: Arc::new(Semaphore::new(n)),
            capacity: n,
        }
    }

    /// Wait until a permit is available, then remove it.
    ///
    /// There is no timeout. Fails with [`HubError::Closed`] once the
    /// semaphore has been closed, including for callers already waiting.
    pub async fn claim(&self) -> Result<()> {
        let permit = self.inner.acquire().await.map_err(|_| HubError::Closed)?;
        permit.forget();
        tracing::trace!(available = self.available(), "Permit claimed");
        Ok(())
    }

    /// Claim a permit that goes back to the pool when the guard is dropped.
    pub async fn claim_guard(&self) -> Result<SemaphoreGuard> {
        self.claim().await?;
        Ok(SemaphoreGuard { sem: self.clone() })
    }

    /// Current number of free permits.
    ///
    /// Advisory only: the value may be stale by the time it is read.
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    /// Number of permits the semaphore was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return one permit to the pool.
    ///
    /// Callers must have claimed before releasing. Releasing more often than
    /// claiming is not detected and grows the pool past its capacity.
    pub fn release(&self) {
        self.inner.add_permits(1);
        tracing::trace!(available = self.available(), "Permit released");
    }

    /// Fail every pending and future [`claim`](Self::claim).
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// A claimed permit that is released on drop.
#[derive(Debug)]
pub struct SemaphoreGuard {
    sem: CountingSemaphore,
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        self.sem.release();
    }
}
