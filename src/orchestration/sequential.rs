//! Sequential task processor
//!
//! One background consumer drains a bounded FIFO queue and awaits each item to
//! completion before taking the next, so at most one enqueued operation runs
//! at any instant and they run in arrival order.

use crate::errors::{BoxError, TaskError};
use crate::infrastructure::metrics::{global_metrics, names, Timer};
use crate::orchestration::cancel::CancellationToken;
use crate::orchestration::gate::guarded;
use crate::orchestration::queue::{FullMode, QueueOptions};
use flume::{Receiver, Sender, TrySendError};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queued unit of work. Runs the operation and reports into its handle.
pub(crate) type Job = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Wrap an operation into a job plus the handle that will receive its outcome.
pub(crate) fn package<F, Fut, T, E>(op: F) -> (Job, TaskHandle<T>)
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let (reply_tx, reply_rx) = flume::bounded(1);
    let job: Job = Box::new(move |token: CancellationToken| -> BoxFuture<'static, ()> {
        Box::pin(async move {
            // A raised processor token means the item never started.
            let outcome = if token.is_cancelled() {
                Err(TaskError::Closed)
            } else {
                guarded(move || op(token)).await
            };
            // The caller may have dropped its handle; the outcome is then discarded.
            let _ = reply_tx.send(outcome);
        })
    });
    (job, TaskHandle { reply: reply_rx })
}

/// Completion handle for one queued operation.
pub struct TaskHandle<T> {
    reply: Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the operation to run. Resolves to `Closed` if the processor
    /// stopped before running it.
    pub async fn join(self) -> Result<T, TaskError> {
        self.reply
            .recv_async()
            .await
            .unwrap_or(Err(TaskError::Closed))
    }

    /// Whether the outcome is already available.
    pub fn is_finished(&self) -> bool {
        !self.reply.is_empty() || self.reply.is_disconnected()
    }
}

/// Wait for a consumer to finish, cancelling it once `options.drain_timeout` elapses.
///
/// On expiry the consumer is aborted and joined before the token is raised,
/// so no queued item can start in between.
pub(crate) async fn await_consumer(
    mut consumer: JoinHandle<()>,
    options: &QueueOptions,
    token: &CancellationToken,
    name: &'static str,
) -> bool {
    let drained = match options.drain_timeout {
        None => consumer.await.is_ok(),
        Some(limit) => match tokio::time::timeout(limit, &mut consumer).await {
            Ok(joined) => joined.is_ok(),
            Err(_) => {
                warn!(processor = name, ?limit, "drain timeout elapsed; cancelling remaining work");
                consumer.abort();
                let _ = consumer.await;
                token.cancel();
                false
            }
        },
    };
    info!(processor = name, drained, "processor stopped");
    drained
}

/// FIFO processor running one operation at a time.
pub struct SequentialTaskProcessor {
    sender: Mutex<Option<Sender<Job>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    options: QueueOptions,
    token: CancellationToken,
}

impl SequentialTaskProcessor {
    /// Start the consumer on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use [`Self::with_runtime`] there.
    pub fn new(options: QueueOptions) -> Self {
        Self::with_runtime(options, &Handle::current())
    }

    pub fn with_runtime(options: QueueOptions, runtime: &Handle) -> Self {
        let (sender, receiver) = if options.is_bounded() {
            flume::bounded(options.capacity)
        } else {
            flume::unbounded()
        };
        let token = CancellationToken::new();
        let consumer = runtime.spawn(consume(receiver, token.clone()));

        info!(capacity = options.capacity, full_mode = ?options.full_mode, "sequential processor started");

        Self {
            sender: Mutex::new(Some(sender)),
            consumer: Mutex::new(Some(consumer)),
            options,
            token,
        }
    }

    /// Queue `op` and return its handle once it has been accepted.
    ///
    /// Suspends while the queue is full under `FullMode::Wait`; fails with
    /// `QueueFull` under `FullMode::Reject`, and with `Closed` after shutdown.
    pub async fn submit<F, Fut, T, E>(&self, op: F) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let sender = self.sender.lock().clone().ok_or(TaskError::Closed)?;
        let (job, handle) = package(op);

        match self.options.full_mode {
            FullMode::Wait => sender.send_async(job).await.map_err(|_| TaskError::Closed)?,
            FullMode::Reject => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => TaskError::QueueFull,
                TrySendError::Disconnected(_) => TaskError::Closed,
            })?,
        }

        debug!(queued = sender.len(), "sequential item queued");
        Ok(handle)
    }

    /// Queue `op` and wait for its result.
    pub async fn enqueue<F, Fut, T, E>(&self, op: F) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.submit(op).await?.join().await
    }

    /// Items waiting in the queue (excluding the one running).
    pub fn len(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Token handed to every operation; raised when a drain times out.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop accepting work, run what is already queued, then stop the consumer.
    ///
    /// Returns `false` when the drain timeout cut the queue short; handles of
    /// items that never ran resolve to `Closed`.
    pub async fn shutdown(&self) -> bool {
        // Dropping the last sender lets the consumer exit once the queue is empty.
        drop(self.sender.lock().take());
        let consumer = self.consumer.lock().take();
        match consumer {
            Some(consumer) => await_consumer(consumer, &self.options, &self.token, "sequential").await,
            None => true,
        }
    }
}

async fn consume(receiver: Receiver<Job>, token: CancellationToken) {
    let metrics = global_metrics();
    while let Ok(job) = receiver.recv_async().await {
        let _timer = Timer::new(metrics.clone(), names::SEQUENTIAL_RUN);
        job(token.clone()).await;
        metrics.increment(names::SEQUENTIAL_COMPLETED);
    }
    debug!("sequential queue drained");
}
