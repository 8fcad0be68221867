//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::SchedulerError;

/// Shared cancellation flag.
///
/// Clones share one underlying flag, so the submitter and the running task
/// observe the same state. Cancellation is cooperative: the engine checks the
/// token before starting a task, and a running task sees it only if it polls
/// [`is_cancelled`](Self::is_cancelled) or [`check`](Self::check).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Return `Err(TaskCancelled)` once cancelled, for use with `?` inside a
    /// payload. The worker classifies that error as a cancellation rather than
    /// a failure.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskCancelled`] if the token was cancelled.
    pub fn check(&self) -> Result<(), SchedulerError> {
        if self.is_cancelled() {
            Err(SchedulerError::TaskCancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        for _ in 0..5 {
            token.cancel();
            assert!(token.is_cancelled());
        }
        assert!(matches!(token.check(), Err(SchedulerError::TaskCancelled)));
    }

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        let handle = thread::spawn(move || {
            token.cancel();
        });
        handle.join().unwrap();
        assert!(observer.is_cancelled());
    }
}
