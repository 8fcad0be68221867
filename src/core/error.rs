//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by scheduler components.
///
/// Admission errors (`QueueFull`, `CircuitOpen`, `SystemShuttingDown`) are
/// returned synchronously from submission calls. Execution errors
/// (`TaskCancelled`, `TaskPayloadFailed`) are delivered through the task's
/// handle and never escape a worker thread.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Queue capacity exceeded at submission time.
    #[error("queue full: capacity {capacity} reached")]
    QueueFull {
        /// Configured maximum queue depth.
        capacity: usize,
    },
    /// The circuit breaker is open; retry after the given delay.
    #[error("circuit open: retry after {retry_after:?}")]
    CircuitOpen {
        /// Time remaining until the breaker admits a trial task.
        retry_after: Duration,
    },
    /// Submission after shutdown was initiated.
    #[error("system is shutting down")]
    SystemShuttingDown,
    /// Cancellation observed before or during execution.
    #[error("task cancelled")]
    TaskCancelled,
    /// The task payload returned an error or panicked.
    #[error("task payload failed: {0}")]
    TaskPayloadFailed(String),
    /// A blocking wait hit its deadline.
    #[error("operation timed out")]
    Timeout,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (thread spawn error, disconnected result channel).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Whether the caller may back off and retry the same request.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::CircuitOpen { .. } | Self::Timeout
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Task payloads return this type.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(SchedulerError::QueueFull { capacity: 1 }.is_recoverable());
        assert!(SchedulerError::CircuitOpen {
            retry_after: Duration::from_millis(5)
        }
        .is_recoverable());
        assert!(!SchedulerError::SystemShuttingDown.is_recoverable());
        assert!(!SchedulerError::TaskCancelled.is_recoverable());
    }
}
