//! Task groups: await pre-built work and propagate the first failure.
//!
//! Unlike `run_all`, a group is used when the caller needs to know that a
//! specific unit of work failed. Results come back in submission order.

use crate::errors::{BoxError, TaskError};
use crate::orchestration::cancel::CancellationToken;
use crate::orchestration::gate::{guarded, PermitPool};
use futures::future::{try_join_all, BoxFuture};
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

fn join_error(error: JoinError) -> TaskError {
    if error.is_panic() {
        TaskError::from_panic(error.into_panic())
    } else {
        TaskError::Cancelled
    }
}

/// Group of value-producing tasks.
pub struct ResultTaskGroup<'a, T> {
    tasks: Vec<BoxFuture<'a, Result<T, TaskError>>>,
    pool: Option<PermitPool>,
}

impl<'a, T: Send + 'a> ResultTaskGroup<'a, T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            pool: None,
        }
    }

    /// Await at most `pool.capacity()` tasks at a time.
    pub fn with_pool(mut self, pool: PermitPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Add a future. It does not make progress until `run_tasks` polls it.
    pub fn push<Fut, E>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<T, E>> + Send + 'a,
        E: Into<BoxError> + 'a,
    {
        self.tasks.push(Box::pin(guarded(move || task)));
    }

    /// Add an already-spawned task. Its panic or abort becomes a `TaskError`.
    pub fn push_handle<E>(&mut self, handle: JoinHandle<Result<T, E>>)
    where
        T: 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.tasks.push(Box::pin(async move {
            match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::failed(e)),
                Err(e) => Err(join_error(e)),
            }
        }));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Await every task and return their values in submission order.
    ///
    /// Fails fast: the first error is returned and the remaining futures are
    /// dropped (spawned tasks keep running detached). A token that is already
    /// raised, or gets raised while waiting, yields `Cancelled`.
    pub async fn run_tasks(self, cancel: Option<&CancellationToken>) -> Result<Vec<T>, TaskError> {
        if cancel.map_or(false, CancellationToken::is_cancelled) {
            return Err(TaskError::Cancelled);
        }

        debug!(tasks = self.tasks.len(), gated = self.pool.is_some(), "task group started");

        let pool = self.pool.as_ref();
        let all = try_join_all(self.tasks.into_iter().map(|task| async move {
            let _permit = match pool {
                Some(pool) => Some(pool.acquire().await?),
                None => None,
            };
            task.await
        }));

        match cancel {
            None => all.await,
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(TaskError::Cancelled),
                    result = all => result,
                }
            }
        }
    }
}

impl<'a, T: Send + 'a> Default for ResultTaskGroup<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Group of tasks run for their side effects.
pub struct TaskGroup<'a> {
    inner: ResultTaskGroup<'a, ()>,
}

impl<'a> TaskGroup<'a> {
    pub fn new() -> Self {
        Self {
            inner: ResultTaskGroup::new(),
        }
    }

    pub fn with_pool(self, pool: PermitPool) -> Self {
        Self {
            inner: self.inner.with_pool(pool),
        }
    }

    pub fn push<Fut, E>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<(), E>> + Send + 'a,
        E: Into<BoxError> + 'a,
    {
        self.inner.push(task);
    }

    pub fn push_handle<E>(&mut self, handle: JoinHandle<Result<(), E>>)
    where
        E: Into<BoxError> + Send + 'static,
    {
        self.inner.push_handle(handle);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub async fn run_tasks(self, cancel: Option<&CancellationToken>) -> Result<(), TaskError> {
        self.inner.run_tasks(cancel).await.map(|_| ())
    }
}

impl<'a> Default for TaskGroup<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let mut group = ResultTaskGroup::new();
        for (i, delay) in [30_u64, 10, 20].into_iter().enumerate() {
            group.push(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, TaskError>(i)
            });
        }

        assert_eq!(group.run_tasks(None).await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_first_error_propagates() {
        let mut group = ResultTaskGroup::new();
        group.push(async { Ok::<u8, BoxError>(1) });
        group.push(async { Err::<u8, BoxError>("upload rejected".into()) });

        let err = group.run_tasks(None).await.unwrap_err();
        assert_eq!(err.to_string(), "work item failed: upload rejected");
    }

    #[tokio::test]
    async fn test_pre_raised_token_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));

        let mut group = TaskGroup::new();
        let counter = ran.clone();
        group.push(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TaskError>(())
        });

        let err = group.run_tasks(Some(&token)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_raised_while_waiting() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new();
        group.push(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, TaskError>(())
        });

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = group.run_tasks(Some(&token)).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_spawned_panic_becomes_error() {
        let mut group = TaskGroup::new();
        group.push_handle(tokio::spawn(async { Ok::<_, TaskError>(()) }));
        group.push_handle(tokio::spawn(async {
            if true {
                panic!("worker died");
            }
            Ok::<_, TaskError>(())
        }));

        let err = group.run_tasks(None).await.unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "worker died"));
    }

    #[tokio::test]
    async fn test_gated_group_restores_pool() {
        let pool = PermitPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut group = TaskGroup::new().with_pool(pool.clone());
        for _ in 0..6 {
            let active = active.clone();
            let peak = peak.clone();
            group.push(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, TaskError>(())
            });
        }

        group.run_tasks(None).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }
}
