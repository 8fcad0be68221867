//! Task units, type-erased payloads and result handles.
//!
//! A submitted closure is boxed into a [`Runnable`] cell together with the
//! sending half of a one-shot result channel. The worker drives the cell in
//! two steps: `run`/`abandon` computes the outcome and reports a
//! [`JobStatus`] for metrics and the circuit breaker, then `deliver` hands the
//! typed outcome to the caller's [`TaskHandle`]. Bookkeeping therefore always
//! precedes result delivery.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::core::{AppResult, CancellationToken, SchedulerError};
use crate::util::types::{Priority, TaskId};

/// Outcome classification reported to the worker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobStatus {
    /// Payload returned a value.
    Completed,
    /// Payload returned an error or panicked.
    Failed(String),
    /// Cancelled before or during execution.
    Cancelled,
    /// Refused by the engine (circuit open) without running.
    Rejected,
}

/// Type-erased executable cell stored inside a [`PriorityTask`].
pub(crate) trait Runnable: Send {
    /// Execute the payload. A second call never re-runs it.
    fn run(&mut self) -> JobStatus;
    /// Finish the task without running the payload.
    fn abandon(&mut self, reason: SchedulerError) -> JobStatus;
    /// Send the computed outcome to the handle, if anyone is listening.
    fn deliver(self: Box<Self>);
}

/// Terminal result of a task, as seen through its [`TaskHandle`].
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The payload ran and produced a value.
    Completed(T),
    /// The task was cancelled before or during execution.
    Cancelled,
    /// The payload failed, or the engine refused to run it.
    Failed(SchedulerError),
}

impl<T> TaskOutcome<T> {
    /// Convert into a `Result`, mapping `Cancelled` to
    /// [`SchedulerError::TaskCancelled`].
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation carried by this outcome.
    pub fn into_result(self) -> Result<T, SchedulerError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Cancelled => Err(SchedulerError::TaskCancelled),
            Self::Failed(err) => Err(err),
        }
    }

    /// Whether the payload completed successfully.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the task failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Cell pairing a closure with its result channel.
struct TaskCell<F, T> {
    body: Option<F>,
    outcome: Option<TaskOutcome<T>>,
    reply: Sender<TaskOutcome<T>>,
}

impl<F, T> TaskCell<F, T> {
    fn finish(&mut self, outcome: TaskOutcome<T>) -> JobStatus {
        let status = match &outcome {
            TaskOutcome::Completed(_) => JobStatus::Completed,
            TaskOutcome::Cancelled => JobStatus::Cancelled,
            TaskOutcome::Failed(SchedulerError::TaskPayloadFailed(msg)) => {
                JobStatus::Failed(msg.clone())
            }
            TaskOutcome::Failed(_) => JobStatus::Rejected,
        };
        self.outcome = Some(outcome);
        status
    }
}

impl<F, T> Runnable for TaskCell<F, T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    fn run(&mut self) -> JobStatus {
        let Some(body) = self.body.take() else {
            return self.abandon(SchedulerError::Internal(
                "task body already consumed".into(),
            ));
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(err)) => classify_error(&err),
            Err(payload) => TaskOutcome::Failed(SchedulerError::TaskPayloadFailed(format!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        self.finish(outcome)
    }

    fn abandon(&mut self, reason: SchedulerError) -> JobStatus {
        self.body = None;
        let outcome = match reason {
            SchedulerError::TaskCancelled => TaskOutcome::Cancelled,
            other => TaskOutcome::Failed(other),
        };
        self.finish(outcome)
    }

    fn deliver(self: Box<Self>) {
        let cell = *self;
        if let Some(outcome) = cell.outcome {
            // The receiver may have been dropped; the outcome is still counted.
            let _ = cell.reply.send(outcome);
        }
    }
}

fn classify_error<T>(err: &anyhow::Error) -> TaskOutcome<T> {
    if matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::TaskCancelled)
    ) {
        TaskOutcome::Cancelled
    } else {
        TaskOutcome::Failed(SchedulerError::TaskPayloadFailed(format!("{err:#}")))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A unit of work held by the task queue.
///
/// Ordering: higher priority first, then earlier `scheduled_time`, then lower
/// id (submission order).
pub struct PriorityTask {
    id: TaskId,
    priority: Priority,
    scheduled_time: Instant,
    enqueued_at: Instant,
    cancel_token: Option<CancellationToken>,
    payload: Box<dyn Runnable>,
}

impl PriorityTask {
    /// Build a task and the handle that will receive its outcome.
    pub(crate) fn with_handle<F, T>(
        id: TaskId,
        priority: Priority,
        scheduled_time: Instant,
        cancel_token: Option<CancellationToken>,
        body: F,
    ) -> (Self, TaskHandle<T>)
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, receiver) = bounded(1);
        let cell = TaskCell {
            body: Some(body),
            outcome: None,
            reply,
        };
        let task = Self {
            id,
            priority,
            scheduled_time,
            enqueued_at: Instant::now(),
            cancel_token: cancel_token.clone(),
            payload: Box::new(cell),
        };
        let handle = TaskHandle {
            id,
            receiver,
            cancel_token,
        };
        (task, handle)
    }

    /// Build a fire-and-forget task from a plain closure.
    ///
    /// Useful when driving a [`QueueStrategy`](crate::core::QueueStrategy)
    /// directly; the engine's submission API creates tasks itself.
    pub fn from_fn<F>(id: TaskId, priority: Priority, scheduled_time: Instant, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (task, _handle) = Self::with_handle(id, priority, scheduled_time, None, move || {
            body();
            Ok(())
        });
        task
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Earliest instant the task may run.
    #[must_use]
    pub const fn scheduled_time(&self) -> Instant {
        self.scheduled_time
    }

    /// Instant the task was created.
    #[must_use]
    pub const fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Cancellation token attached at submission, if any.
    #[must_use]
    pub const fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel_token.as_ref()
    }

    /// Whether the task may run at `now`.
    #[must_use]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.scheduled_time <= now
    }

    /// Run the payload on the current thread and deliver its outcome.
    ///
    /// Returns `true` if the payload completed successfully.
    pub fn execute(self) -> bool {
        let mut payload = self.payload;
        let status = payload.run();
        payload.deliver();
        status == JobStatus::Completed
    }

    /// Split off the executable cell for the worker loop.
    pub(crate) fn into_payload(self) -> Box<dyn Runnable> {
        self.payload
    }

    /// Finish the task without running it and deliver the outcome.
    pub(crate) fn abandon(self, reason: SchedulerError) -> JobStatus {
        let mut payload = self.payload;
        let status = payload.abandon(reason);
        payload.deliver();
        status
    }
}

impl fmt::Debug for PriorityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("scheduled_time", &self.scheduled_time)
            .field("cancellable", &self.cancel_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Caller-side handle to a submitted task's outcome.
///
/// Dropping the handle does not cancel the task; its outcome is still
/// reflected in the engine's metrics.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    receiver: Receiver<TaskOutcome<T>>,
    cancel_token: Option<CancellationToken>,
}

impl<T> TaskHandle<T> {
    /// Identifier of the task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Token passed to `submit_cancellable`, if any.
    #[must_use]
    pub const fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel_token.as_ref()
    }

    /// Block until the task reaches a terminal state.
    #[must_use]
    pub fn wait(self) -> TaskOutcome<T> {
        self.receiver
            .recv()
            .unwrap_or(TaskOutcome::Failed(SchedulerError::SystemShuttingDown))
    }

    /// Block for at most `timeout`. Returns `None` if the task is still
    /// pending; the handle stays usable.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(TaskOutcome::Failed(SchedulerError::SystemShuttingDown))
            }
        }
    }

    /// Non-blocking check for a finished outcome.
    #[must_use]
    pub fn try_outcome(&self) -> Option<TaskOutcome<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(TaskOutcome::Failed(SchedulerError::SystemShuttingDown))
            }
        }
    }

    /// Wait for the value, optionally bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Timeout` if the deadline passes first
    /// - `SchedulerError::TaskCancelled` if the task was cancelled
    /// - the task's failure otherwise
    pub fn get(self, timeout: Option<Duration>) -> Result<T, SchedulerError> {
        match timeout {
            None => self.wait().into_result(),
            Some(timeout) => self
                .wait_timeout(timeout)
                .ok_or(SchedulerError::Timeout)?
                .into_result(),
        }
    }
}

#[cfg(feature = "tokio-runtime")]
impl<T: Send + 'static> TaskHandle<T> {
    /// Wait for the value from async code.
    ///
    /// The blocking channel wait runs on tokio's blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get); `Internal` if the blocking task panicked.
    pub async fn wait_async(self, timeout: Duration) -> Result<T, SchedulerError> {
        let receiver = self.receiver;
        let waited = tokio::task::spawn_blocking(move || receiver.recv_timeout(timeout))
            .await
            .map_err(|e| SchedulerError::Internal(format!("blocking wait failed: {e}")))?;

        match waited {
            Ok(outcome) => outcome.into_result(),
            Err(RecvTimeoutError::Timeout) => Err(SchedulerError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SchedulerError::SystemShuttingDown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_task<T: Send + 'static>(
        body: impl FnOnce() -> AppResult<T> + Send + 'static,
    ) -> (PriorityTask, TaskHandle<T>) {
        PriorityTask::with_handle(1, Priority::NORMAL, Instant::now(), None, body)
    }

    #[test]
    fn test_completed_outcome_delivered() {
        let (task, handle) = make_task(|| Ok(21 * 2));
        assert!(task.execute());
        assert_eq!(handle.get(Some(Duration::from_secs(1))).unwrap(), 42);
    }

    #[test]
    fn test_error_becomes_payload_failure() {
        let (task, handle) = make_task::<()>(|| Err(anyhow::anyhow!("disk unavailable")));
        let mut payload = task.into_payload();
        assert_eq!(payload.run(), JobStatus::Failed("disk unavailable".into()));
        payload.deliver();
        match handle.wait() {
            TaskOutcome::Failed(SchedulerError::TaskPayloadFailed(msg)) => {
                assert!(msg.contains("disk unavailable"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_panic_is_captured() {
        let (task, handle) = make_task::<()>(|| panic!("boom"));
        let mut payload = task.into_payload();
        assert!(matches!(payload.run(), JobStatus::Failed(msg) if msg.contains("boom")));
        payload.deliver();
        assert!(handle.wait().is_failed());
    }

    #[test]
    fn test_cancel_error_is_classified_as_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let inner = token.clone();
        let (task, handle) = make_task::<()>(move || {
            inner.check()?;
            Ok(())
        });
        let mut payload = task.into_payload();
        assert_eq!(payload.run(), JobStatus::Cancelled);
        payload.deliver();
        assert!(handle.wait().is_cancelled());
    }

    #[test]
    fn test_run_is_at_most_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let (task, _handle) = make_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let mut payload = task.into_payload();
        assert_eq!(payload.run(), JobStatus::Completed);
        assert_eq!(payload.run(), JobStatus::Rejected);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandon_skips_payload() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let (task, handle) = make_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(task.abandon(SchedulerError::TaskCancelled), JobStatus::Cancelled);
        assert!(handle.wait().is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_timeout_keeps_handle() {
        let (task, handle) = make_task(|| Ok("late"));
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
        task.execute();
        assert!(handle
            .wait_timeout(Duration::from_secs(1))
            .is_some_and(|o| o.is_completed()));
    }

    #[test]
    fn test_dropped_task_reports_shutdown() {
        let (task, handle) = make_task(|| Ok(()));
        drop(task);
        assert!(matches!(
            handle.get(None),
            Err(SchedulerError::SystemShuttingDown)
        ));
    }
}
