//! Tests for error types and their classification

use std::time::Duration;

use prometheus_task_engine::core::{SchedulerError, TaskOutcome};

#[test]
fn test_error_display() {
    assert_eq!(
        SchedulerError::QueueFull { capacity: 8 }.to_string(),
        "queue full: capacity 8 reached"
    );
    assert_eq!(SchedulerError::SystemShuttingDown.to_string(), "system is shutting down");
    assert_eq!(SchedulerError::TaskCancelled.to_string(), "task cancelled");
    assert!(SchedulerError::TaskPayloadFailed("boom".into())
        .to_string()
        .contains("boom"));
    assert!(SchedulerError::InvalidConfig("bad".into())
        .to_string()
        .starts_with("invalid configuration"));
}

#[test]
fn test_recoverable_classification() {
    assert!(SchedulerError::QueueFull { capacity: 1 }.is_recoverable());
    assert!(SchedulerError::CircuitOpen {
        retry_after: Duration::from_millis(10)
    }
    .is_recoverable());
    assert!(SchedulerError::Timeout.is_recoverable());

    assert!(!SchedulerError::SystemShuttingDown.is_recoverable());
    assert!(!SchedulerError::TaskCancelled.is_recoverable());
    assert!(!SchedulerError::TaskPayloadFailed("x".into()).is_recoverable());
    assert!(!SchedulerError::Internal("x".into()).is_recoverable());
}

#[test]
fn test_error_converts_into_anyhow() {
    fn payload() -> anyhow::Result<()> {
        Err(SchedulerError::TaskCancelled)?;
        Ok(())
    }
    let err = payload().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::TaskCancelled)
    ));
}

#[test]
fn test_outcome_into_result() {
    assert_eq!(TaskOutcome::Completed(3).into_result().unwrap(), 3);
    assert!(matches!(
        TaskOutcome::<()>::Cancelled.into_result(),
        Err(SchedulerError::TaskCancelled)
    ));
    let failed = TaskOutcome::<()>::Failed(SchedulerError::TaskPayloadFailed("io".into()));
    assert!(failed.is_failed());
    assert!(matches!(failed.into_result(), Err(SchedulerError::TaskPayloadFailed(_))));
}
