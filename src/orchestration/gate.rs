//! Gate: run one asynchronous operation under a counting semaphore.
//!
//! The permit is an RAII guard, so it goes back to the pool on every exit
//! path: success, error, panic, and the caller dropping the future mid-flight.
//! Absent pool means the operation runs immediately.

use crate::errors::{BoxError, TaskError};
use crate::infrastructure::metrics::{global_metrics, names, Timer};
use crate::orchestration::cancel::CancellationToken;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// Counting semaphore with a fixed capacity. Clones share the same permits.
#[derive(Clone)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl PermitPool {
    /// A capacity of zero would never admit anything and is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held by running operations.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Stop handing out permits. Waiters and later callers get `PoolClosed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub(crate) async fn acquire(&self) -> Result<SemaphorePermit<'_>, TaskError> {
        let _timer = Timer::global(names::GATE_WAIT);
        self.semaphore.acquire().await.map_err(|_| TaskError::PoolClosed)
    }
}

impl std::fmt::Debug for PermitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Wait for a permit unless the token is raised first.
///
/// Returns `Cancelled` when the token is already raised, is raised while
/// waiting, or was raised by the time the permit arrived. In the last case
/// the permit is released again before returning.
pub(crate) async fn admit<'a>(
    pool: Option<&'a PermitPool>,
    cancel: Option<&CancellationToken>,
) -> Result<Option<SemaphorePermit<'a>>, TaskError> {
    let raised = || cancel.map_or(false, CancellationToken::is_cancelled);
    if raised() {
        return Err(TaskError::Cancelled);
    }

    let permit = match (pool, cancel) {
        (None, _) => None,
        (Some(pool), None) => Some(pool.acquire().await?),
        (Some(pool), Some(token)) => {
            let acquired = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = pool.acquire() => Some(permit?),
            };
            match acquired {
                Some(permit) => Some(permit),
                None => return Err(TaskError::Cancelled),
            }
        }
    };

    if raised() {
        return Err(TaskError::Cancelled);
    }
    Ok(permit)
}

/// Run `op`, turning its error or panic into a `TaskError`.
pub(crate) async fn guarded<F, Fut, T, E>(op: F) -> Result<T, TaskError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(fut) => fut,
        Err(payload) => return Err(TaskError::from_panic(payload)),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::failed(e)),
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}

/// Run `op` through the gate and propagate its failure.
pub async fn run_gated<F, Fut, T, E>(pool: Option<&PermitPool>, op: F) -> Result<T, TaskError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    let _permit = match pool {
        Some(pool) => Some(pool.acquire().await?),
        None => None,
    };
    guarded(op).await
}

/// Run `op` through the gate, logging and absorbing any failure.
pub async fn run_gated_contained<F, Fut, T, E>(
    pool: Option<&PermitPool>,
    op: F,
    context: &str,
) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    contain(run_gated(pool, op).await, context)
}

/// Log a failed outcome and discard it.
///
/// Cancellation is expected under `break_on_error` and only logged at debug.
pub fn contain<T>(outcome: Result<T, TaskError>, context: &str) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(TaskError::Cancelled) => {
            debug!(context, "work item skipped after cancellation");
            None
        }
        Err(error) => {
            global_metrics().increment(names::GATE_FAILED);
            warn!(context, %error, "work item failed; continuing");
            None
        }
    }
}
