//! Error type shared by every orchestration primitive.

use std::any::Any;
use std::fmt;

/// Boxed failure produced by a work item.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a work item, batch or queued task did not produce a value.
#[derive(Debug)]
pub enum TaskError {
    /// The work item itself returned an error.
    Failed(BoxError),
    /// The work item panicked; the payload message is kept when it is a string.
    Panicked(String),
    /// Skipped or abandoned because a cancellation token was raised.
    Cancelled,
    /// The permit pool was closed while waiting for a permit.
    PoolClosed,
    /// The queue is at capacity and its full mode rejects new items.
    QueueFull,
    /// The processor no longer accepts work, or stopped before running it.
    Closed,
}

impl TaskError {
    /// Wrap a work item failure.
    ///
    /// A `TaskError` that went through `Into<BoxError>` is unwrapped again
    /// instead of being nested inside `Failed`.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        match error.into().downcast::<TaskError>() {
            Ok(inner) => *inner,
            Err(other) => Self::Failed(other),
        }
    }

    /// Build a `Panicked` error from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "work item failed: {}", e),
            Self::Panicked(msg) => write!(f, "work item panicked: {}", msg),
            Self::Cancelled => write!(f, "work item cancelled"),
            Self::PoolClosed => write!(f, "permit pool closed"),
            Self::QueueFull => write!(f, "task queue full"),
            Self::Closed => write!(f, "task processor closed"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
