//! Queue construction parameters shared by the sequential processors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a producer experiences when the queue is at capacity.
///
/// Neither mode drops an item silently: `Wait` suspends the producer until a
/// slot frees up, `Reject` hands the item back as `TaskError::QueueFull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FullMode {
    #[default]
    Wait,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum queued (not yet running) items. `0` means unbounded.
    pub capacity: usize,
    pub full_mode: FullMode,
    /// How long `shutdown` waits for the queue to drain before cancelling.
    /// `None` waits indefinitely.
    pub drain_timeout: Option<Duration>,
}

impl QueueOptions {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn unbounded() -> Self {
        Self::bounded(0)
    }

    pub fn with_full_mode(mut self, full_mode: FullMode) -> Self {
        self.full_mode = full_mode;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            capacity: 1024,
            full_mode: FullMode::Wait,
            drain_timeout: None,
        }
    }
}
