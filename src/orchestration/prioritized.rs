//! Prioritized sequential task processor
//!
//! Same single-in-flight guarantee as [`SequentialTaskProcessor`], but the
//! consumer picks the highest [`PriorityLevel`] among queued items each time
//! it becomes free. Within a level, items with an ordinal run first in
//! ordinal order, then the rest in arrival order.
//! An item already running is never preempted.
//!
//! [`SequentialTaskProcessor`]: crate::orchestration::sequential::SequentialTaskProcessor

use crate::errors::{BoxError, TaskError};
use crate::infrastructure::metrics::{global_metrics, names, Timer};
use crate::orchestration::cancel::CancellationToken;
use crate::orchestration::queue::{FullMode, QueueOptions};
use crate::orchestration::sequential::{await_consumer, package, Job, TaskHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Coarse scheduling class. Higher levels run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

struct Entry {
    level: PriorityLevel,
    ordinal: Option<u64>,
    seq: u64,
    job: Job,
    // Queue slot; released when the entry is dequeued.
    slot: Option<OwnedSemaphorePermit>,
}

impl Entry {
    // Max-heap key: level desc, ordered before unordered, ordinal asc, arrival asc.
    fn key(&self) -> (PriorityLevel, bool, Reverse<Option<u64>>, Reverse<u64>) {
        (self.level, self.ordinal.is_some(), Reverse(self.ordinal), Reverse(self.seq))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Notify,
    slots: Option<Arc<Semaphore>>,
    seq: AtomicU64,
}

enum Next {
    Run(Entry),
    Wait,
    Stop,
}

/// Single-consumer processor ordered by priority level.
pub struct PrioritizedSequentialTaskProcessor {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    options: QueueOptions,
    token: CancellationToken,
}

impl PrioritizedSequentialTaskProcessor {
    /// Start the consumer on the current tokio runtime.
    pub fn new(options: QueueOptions) -> Self {
        Self::with_runtime(options, &Handle::current())
    }

    pub fn with_runtime(options: QueueOptions, runtime: &Handle) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            ready: Notify::new(),
            slots: options
                .is_bounded()
                .then(|| Arc::new(Semaphore::new(options.capacity.min(Semaphore::MAX_PERMITS)))),
            seq: AtomicU64::new(0),
        });
        let token = CancellationToken::new();
        let consumer = runtime.spawn(consume(shared.clone(), token.clone()));

        info!(capacity = options.capacity, full_mode = ?options.full_mode, "prioritized processor started");

        Self {
            shared,
            consumer: Mutex::new(Some(consumer)),
            options,
            token,
        }
    }

    async fn reserve_slot(&self) -> Result<Option<OwnedSemaphorePermit>, TaskError> {
        let Some(slots) = &self.shared.slots else {
            return Ok(None);
        };
        let permit = match self.options.full_mode {
            FullMode::Wait => slots.clone().acquire_owned().await.map_err(|_| TaskError::Closed)?,
            FullMode::Reject => slots.clone().try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => TaskError::QueueFull,
                TryAcquireError::Closed => TaskError::Closed,
            })?,
        };
        Ok(Some(permit))
    }

    /// Queue `op` at `level` and return its handle once accepted.
    ///
    /// `ordinal` orders items within a level (lower first). Items without one
    /// run after every ordered item of their level, in arrival order.
    pub async fn submit_with_priority<F, Fut, T, E>(
        &self,
        op: F,
        ordinal: Option<u64>,
        level: PriorityLevel,
    ) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if self.shared.queue.lock().closed {
            return Err(TaskError::Closed);
        }
        let slot = self.reserve_slot().await?;
        let (job, handle) = package(op);
        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::Relaxed);

        let queued = {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return Err(TaskError::Closed);
            }
            queue.heap.push(Entry {
                level,
                ordinal,
                seq,
                job,
                slot,
            });
            queue.heap.len()
        };
        self.shared.ready.notify_one();

        debug!(?level, seq, queued, "prioritized item queued");
        Ok(handle)
    }

    /// Queue `op` at `level` and wait for its result.
    pub async fn enqueue_with_priority<F, Fut, T, E>(
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
        self.submit_with_priority(op, ordinal, level).await?.join().await
    }

    /// Queue `op` at `PriorityLevel::Normal`.
    pub async fn enqueue<F, Fut, T, E>(&self, op: F) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.enqueue_with_priority(op, None, PriorityLevel::Normal).await
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    fn close(&self) {
        self.shared.queue.lock().closed = true;
        if let Some(slots) = &self.shared.slots {
            slots.close();
        }
        self.shared.ready.notify_one();
    }

    /// Stop accepting work, run what is queued (in priority order), then stop.
    ///
    /// Returns `false` when the drain timeout cut the queue short; handles of
    /// items that never ran resolve to `Closed`.
    pub async fn shutdown(&self) -> bool {
        self.close();
        let consumer = self.consumer.lock().take();
        let Some(consumer) = consumer else {
            return true;
        };
        let drained = await_consumer(consumer, &self.options, &self.token, "prioritized").await;
        if !drained {
            let abandoned = std::mem::take(&mut self.shared.queue.lock().heap);
            debug!(abandoned = abandoned.len(), "dropping undrained prioritized items");
        }
        drained
    }
}

impl Drop for PrioritizedSequentialTaskProcessor {
    fn drop(&mut self) {
        // The consumer drains what is left and exits on its own.
        self.close();
    }
}

async fn consume(shared: Arc<Shared>, token: CancellationToken) {
    let metrics = global_metrics();
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            match queue.heap.pop() {
                Some(entry) => Next::Run(entry),
                None if queue.closed => Next::Stop,
                None => Next::Wait,
            }
        };

        match next {
            Next::Run(Entry { job, slot, level, .. }) => {
                drop(slot);
                let _timer = Timer::new(metrics.clone(), names::PRIORITIZED_RUN);
                debug!(?level, "prioritized item started");
                job(token.clone()).await;
                metrics.increment(names::PRIORITIZED_COMPLETED);
            }
            Next::Wait => shared.ready.notified().await,
            Next::Stop => break,
        }
    }
    debug!("prioritized queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn test_entry_order() {
        let entry = |level, ordinal, seq| Entry {
            level,
            ordinal,
            seq,
            job: Box::new(|_: CancellationToken| -> BoxFuture<'static, ()> { Box::pin(async {}) }),
            slot: None,
        };

        let mut heap = BinaryHeap::new();
        heap.push(entry(PriorityLevel::Normal, Some(0), 0));
        heap.push(entry(PriorityLevel::High, Some(5), 1));
        heap.push(entry(PriorityLevel::High, Some(2), 2));
        heap.push(entry(PriorityLevel::Low, Some(0), 3));
        heap.push(entry(PriorityLevel::Critical, Some(9), 4));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![4, 2, 1, 0, 3]);
    }

    #[test]
    fn test_ordered_entries_precede_unordered_within_level() {
        let entry = |ordinal, seq| Entry {
            level: PriorityLevel::Normal,
            ordinal,
            seq,
            job: Box::new(|_: CancellationToken| -> BoxFuture<'static, ()> { Box::pin(async {}) }),
            slot: None,
        };

        let mut heap = BinaryHeap::new();
        heap.push(entry(None, 0));
        heap.push(entry(Some(5), 1));
        heap.push(entry(None, 2));
        heap.push(entry(Some(1), 3));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![3, 1, 0, 2]);
    }

    #[tokio::test]
    async fn test_high_overtakes_queued_normal() {
        let processor = PrioritizedSequentialTaskProcessor::new(QueueOptions::bounded(8));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = processor
            .submit_with_priority(
                move |_| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, TaskError>(())
                },
                None,
                PriorityLevel::Low,
            )
            .await
            .unwrap();
        started_rx.await.unwrap();

        let mut handles = Vec::new();
        for (name, level) in [("A", PriorityLevel::Normal), ("B", PriorityLevel::High)] {
            let order = order.clone();
            handles.push(
                processor
                    .submit_with_priority(
                        move |_| async move {
                            order.lock().push(name);
                            Ok::<_, TaskError>(())
                        },
                        None,
                        level,
                    )
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(processor.len(), 2);

        release_tx.send(()).unwrap();
        blocker.join().await.unwrap();
        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_reject_mode_and_shutdown() {
        let processor = PrioritizedSequentialTaskProcessor::new(
            QueueOptions::bounded(1).with_full_mode(FullMode::Reject),
        );
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = processor
            .submit_with_priority(
                move |_| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, TaskError>(1)
                },
                None,
                PriorityLevel::Normal,
            )
            .await
            .unwrap();
        started_rx.await.unwrap();

        let queued = processor
            .submit_with_priority(|_| async { Ok::<_, TaskError>(2) }, None, PriorityLevel::High)
            .await
            .unwrap();
        let rejected = processor
            .submit_with_priority(|_| async { Ok::<_, TaskError>(3) }, None, PriorityLevel::Critical)
            .await;
        assert!(matches!(rejected, Err(TaskError::QueueFull)));

        release_tx.send(()).unwrap();
        assert!(processor.shutdown().await);
        assert_eq!(blocker.join().await.unwrap(), 1);
        assert_eq!(queued.join().await.unwrap(), 2);

        let late = processor.enqueue(|_| async { Ok::<_, TaskError>(()) }).await;
        assert!(matches!(late, Err(TaskError::Closed)));
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_queue() {
        let processor = PrioritizedSequentialTaskProcessor::new(
            QueueOptions::unbounded().with_drain_timeout(Duration::from_millis(20)),
        );
        let (started_tx, started_rx) = oneshot::channel();

        let stuck = processor
            .submit_with_priority(
                move |_| async move {
                    let _ = started_tx.send(());
                    std::future::pending::<()>().await;
                    Ok::<_, TaskError>(())
                },
                None,
                PriorityLevel::Normal,
            )
            .await
            .unwrap();
        started_rx.await.unwrap();
        let waiting = processor
            .submit_with_priority(|_| async { Ok::<_, TaskError>(()) }, None, PriorityLevel::Low)
            .await
            .unwrap();

        assert!(!processor.shutdown().await);
        assert!(processor.is_empty());
        assert!(matches!(stuck.join().await, Err(TaskError::Closed)));
        assert!(matches!(waiting.join().await, Err(TaskError::Closed)));
    }
}
