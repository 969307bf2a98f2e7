// Bulk, independent work
pub mod cancel;
pub mod gate;
pub mod fanout;
pub mod group;

// Folding results into caller-owned targets
pub mod sink;
pub mod update;

// Ordered, one-at-a-time work
pub mod queue;
pub mod sequential;
pub mod prioritized;
pub mod service;

// Re-exports
pub use cancel::CancellationToken;
pub use fanout::{run_all, run_all_void, work_item, BatchOptions, ResultAccumulator, WorkItem};
pub use gate::{contain, run_gated, run_gated_contained, PermitPool};
pub use group::{ResultTaskGroup, TaskGroup};
pub use prioritized::{PrioritizedSequentialTaskProcessor, PriorityLevel};
pub use queue::{FullMode, QueueOptions};
pub use sequential::{SequentialTaskProcessor, TaskHandle};
pub use service::{PrioritizedSequentialTaskService, PrioritizedTaskService, SequentialTaskService, TaskService};
pub use sink::{fill, fill_keyed, fill_range, fill_value, Sink, SinkTarget, Table};
pub use update::{coerce, update, PropertyTable, PropertyTableBuilder, Updatable, UpdateError};
