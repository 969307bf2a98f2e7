//! Facade services over the processors.
//!
//! Callers that should not see queue construction get one `execute` call per
//! work item. The traits let tests and alternate schedulers stand in for the
//! real processors.

use crate::errors::{BoxError, TaskError};
use crate::orchestration::cancel::CancellationToken;
use crate::orchestration::prioritized::{PriorityLevel, PrioritizedSequentialTaskProcessor};
use crate::orchestration::sequential::SequentialTaskProcessor;
use std::future::Future;
use std::sync::Arc;

/// Runs work items one at a time, in submission order.
#[async_trait::async_trait]
pub trait TaskService: Send + Sync {
    async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static;
}

/// Runs work items one at a time, highest priority level first.
#[async_trait::async_trait]
pub trait PrioritizedTaskService: Send + Sync {
    async fn execute<F, Fut, T, E>(
        &self,
        op: F,
        ordinal: Option<u64>,
        level: PriorityLevel,
    ) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static;
}

#[derive(Clone)]
pub struct SequentialTaskService {
    processor: Arc<SequentialTaskProcessor>,
}

impl SequentialTaskService {
    pub fn new(processor: Arc<SequentialTaskProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait::async_trait]
impl TaskService for SequentialTaskService {
    async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.processor.enqueue(op).await
    }
}

#[derive(Clone)]
pub struct PrioritizedSequentialTaskService {
    processor: Arc<PrioritizedSequentialTaskProcessor>,
}

impl PrioritizedSequentialTaskService {
    pub fn new(processor: Arc<PrioritizedSequentialTaskProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait::async_trait]
impl PrioritizedTaskService for PrioritizedSequentialTaskService {
    async fn execute<F, Fut, T, E>(
        &self,
        op: F,
        ordinal: Option<u64>,
        level: PriorityLevel,
    ) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.processor.enqueue_with_priority(op, ordinal, level).await
    }
}
