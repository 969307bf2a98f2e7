//! tasklane: concurrency orchestration for async I/O helpers
//!
//! Callers hand over already-built asynchronous work and pick how it runs:
//!
//! - **Gate** ([`run_gated`]): one operation under an optional [`PermitPool`].
//! - **Fan-out** ([`run_all`], [`TaskGroup`], [`ResultTaskGroup`]): many
//!   independent operations, bounded by a pool, with contained or propagated
//!   failures.
//! - **Sinks** ([`fill`], [`fill_range`], [`update`]): fold one result into a
//!   caller-owned container or a named property.
//! - **Processors** ([`SequentialTaskProcessor`],
//!   [`PrioritizedSequentialTaskProcessor`]): one operation at a time, FIFO or
//!   by priority level, with the [`TaskService`] facades on top.

// Core modules
pub mod errors;
pub mod infrastructure;
pub mod orchestration;

// Re-export commonly used items
pub use errors::{BoxError, TaskError};
pub use infrastructure::{global_metrics, init_logging, LogConfig, OrchestrationConfig};
pub use orchestration::{
    fill, fill_keyed, fill_range, fill_value, run_all, run_all_void, run_gated,
    run_gated_contained, update, work_item, BatchOptions, CancellationToken, FullMode,
    PermitPool, PrioritizedSequentialTaskProcessor, PrioritizedSequentialTaskService,
    PrioritizedTaskService, PriorityLevel, QueueOptions, ResultAccumulator, ResultTaskGroup,
    SequentialTaskProcessor, SequentialTaskService, Sink, SinkTarget, Table, TaskGroup,
    TaskHandle, TaskService, Updatable, WorkItem,
};
