//! Fan-out executor: start every work item of a batch, gather what succeeds.
//!
//! Failures are contained: logged, counted, and left out of the result
//! accumulator. With `break_on_error` the first failure raises the batch's
//! cancellation token so items still waiting for admission are skipped.
//! Items already running are not interrupted.

use crate::errors::{BoxError, TaskError};
use crate::infrastructure::metrics::{global_metrics, names};
use crate::orchestration::cancel::CancellationToken;
use crate::orchestration::gate::{admit, guarded, PermitPool};
use crossbeam::queue::SegQueue;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tracing::{debug, warn};

/// Type-erased work item, for batches mixing differently-typed closures.
pub type WorkItem<'a, T, E = BoxError> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Erase the closure and future types of a work item.
pub fn work_item<'a, F, Fut, T, E>(op: F) -> WorkItem<'a, T, E>
where
    F: FnOnce() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    Box::new(move || -> BoxFuture<'a, Result<T, E>> { Box::pin(op()) })
}

/// Thread-safe, unordered, append-only collection of successful results.
pub struct ResultAccumulator<T> {
    items: SegQueue<T>,
}

impl<T> ResultAccumulator<T> {
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
        }
    }

    pub fn push(&self, value: T) {
        self.items.push(value);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        std::iter::from_fn(|| self.items.pop()).collect()
    }
}

impl<T> Default for ResultAccumulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for ResultAccumulator<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

impl<T> std::fmt::Debug for ResultAccumulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAccumulator").field("len", &self.len()).finish()
    }
}

/// Admission and failure policy for one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions<'a> {
    pool: Option<&'a PermitPool>,
    cancel: Option<CancellationToken>,
    break_on_error: bool,
    label: Option<&'a str>,
}

impl<'a> BatchOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Throttle the batch through a shared pool.
    pub fn with_pool(mut self, pool: &'a PermitPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Observe (and, under `break_on_error`, raise) the caller's token.
    pub fn with_cancel(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    pub fn break_on_error(mut self, enabled: bool) -> Self {
        self.break_on_error = enabled;
        self
    }

    /// Name used in log events for this batch.
    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    fn label(&self) -> &str {
        self.label.unwrap_or("batch")
    }
}

/// Run every item, collecting the values of those that succeed.
///
/// The accumulator's size says how many items succeeded, not which ones.
pub async fn run_all<I, F, Fut, T, E>(items: I, options: &BatchOptions<'_>) -> ResultAccumulator<T>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    let results = ResultAccumulator::new();
    run_batch(items, options, |value| results.push(value)).await;
    results
}

/// Run every item for its side effects only.
pub async fn run_all_void<I, F, Fut, E>(items: I, options: &BatchOptions<'_>)
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    run_batch(items, options, |()| {}).await;
}

async fn run_batch<I, F, Fut, T, E, R>(items: I, options: &BatchOptions<'_>, mut record: R)
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
    R: FnMut(T),
{
    // break_on_error needs a token to raise even if the caller gave none.
    let token = match (&options.cancel, options.break_on_error) {
        (Some(token), _) => Some(token.clone()),
        (None, true) => Some(CancellationToken::new()),
        (None, false) => None,
    };
    let token = token.as_ref();
    let pool = options.pool;
    let label = options.label();
    let metrics = global_metrics();

    let mut pending: FuturesUnordered<_> = items
        .into_iter()
        .enumerate()
        .map(|(index, op)| async move {
            let outcome = match admit(pool, token).await {
                Ok(permit) => {
                    let outcome = guarded(op).await;
                    drop(permit);
                    outcome
                }
                Err(e) => Err(e),
            };
            (index, outcome)
        })
        .collect();

    debug!(batch = label, items = pending.len(), "batch started");

    while let Some((index, outcome)) = pending.next().await {
        match outcome {
            Ok(value) => {
                metrics.increment(names::BATCH_SUCCEEDED);
                record(value);
            }
            Err(TaskError::Cancelled) => {
                metrics.increment(names::BATCH_SKIPPED);
                debug!(batch = label, index, "item skipped after cancellation");
            }
            Err(error) => {
                metrics.increment(names::BATCH_FAILED);
                warn!(batch = label, index, %error, "batch item failed");
                if options.break_on_error {
                    if let Some(token) = token {
                        token.cancel();
                    }
                }
            }
        }
    }
}
