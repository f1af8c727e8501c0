//! Error types for pools, queues, groups, and the tasks they run.
//!
//! Two enums cover the whole surface:
//!
//! - [`PoolError`]: lifecycle and configuration misuse, plus task
//!   failures surfaced through a dispatcher's `join()`.
//! - [`TaskError`]: a failure produced by one task execution. These are
//!   captured values carried inside a [`Unit`](crate::unit::Unit), never
//!   unwound across execution-context boundaries.

use std::any::Any;

use thiserror::Error;

/// Errors raised by pool, queue, group, and unit operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Re-entrant start: the unit or dispatcher is already running.
    #[error("already running")]
    AlreadyRunning,

    /// Reconfiguration (or a fresh start) was attempted after the
    /// instance had already started or been joined.
    #[error("cannot reconfigure after start")]
    AlreadyStarted,

    /// Bad constructor arguments.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A task failed with no handler installed; surfaced from `join()`
    /// on a non-detached instance.
    #[error("task failed: {0}")]
    Task(#[from] TaskError),

    /// Forced termination could not be delivered or confirmed.
    #[error("interrupt not confirmed: {0}")]
    Interrupt(String),
}

/// Errors produced by task execution.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("execution failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },

    /// The task panicked; the message is the panic payload when it was
    /// a string, an opaque marker otherwise.
    #[error("task panicked: {message}")]
    Panicked {
        /// The recovered panic message.
        message: String,
    },
}

impl TaskError {
    /// Builds a [`TaskError::Failed`] from any displayable error.
    pub fn failed(error: impl Into<String>) -> Self {
        TaskError::Failed {
            error: error.into(),
        }
    }

    /// Recovers a `TaskError` from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        TaskError::Panicked { message }
    }

    /// Returns a short stable label (snake_case) for use in log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Failed { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_constructor() {
        let err = TaskError::failed("boom");
        assert!(matches!(err, TaskError::Failed { ref error } if error == "boom"));
        assert_eq!(err.as_label(), "task_failed");
    }

    #[test]
    fn test_from_panic_str_payload() {
        let err = TaskError::from_panic(Box::new("exploded"));
        assert!(matches!(err, TaskError::Panicked { ref message } if message == "exploded"));
    }

    #[test]
    fn test_from_panic_string_payload() {
        let err = TaskError::from_panic(Box::new(String::from("exploded")));
        assert!(matches!(err, TaskError::Panicked { ref message } if message == "exploded"));
        assert_eq!(err.as_label(), "task_panicked");
    }

    #[test]
    fn test_from_panic_opaque_payload() {
        let err = TaskError::from_panic(Box::new(42_u32));
        assert!(matches!(err, TaskError::Panicked { ref message } if message == "opaque panic payload"));
    }

    #[test]
    fn test_pool_error_wraps_task_error() {
        let err: PoolError = TaskError::failed("boom").into();
        assert!(matches!(err, PoolError::Task(_)));
        assert_eq!(err.to_string(), "task failed: execution failed: boom");
    }
}
