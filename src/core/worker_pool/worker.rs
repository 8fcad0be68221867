//! Worker thread loop.
//!
//! Each worker blocks in `TaskQueue::pop_blocking` until a ready task arrives
//! or the queue is closed and empty. Per task: a cancelled token skips the
//! payload, an open breaker refuses it with `CircuitOpen`, otherwise the
//! payload runs. Metrics and breaker bookkeeping are updated before the
//! outcome is delivered to the caller's handle.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::task::JobStatus;
use crate::core::{CancellationToken, LogLevel, PopResult, PriorityTask, SchedulerError};

use super::PoolShared;

/// Spawn worker `worker_id` on a named thread.
pub(super) fn spawn_worker(
    worker_id: usize,
    shared: Arc<PoolShared>,
    stack_size: usize,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("task-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id = worker_id, "Worker thread started");
            shared
                .sink
                .log(LogLevel::Info, &format!("worker {worker_id} started"));

            let mut executed: u64 = 0;
            loop {
                match shared.queue.pop_blocking(worker_id, None) {
                    PopResult::Popped(task) => {
                        run_task(worker_id, &shared, task);
                        executed += 1;
                    }
                    PopResult::TimedOut => {}
                    PopResult::Shutdown => break,
                }
            }

            debug!(worker_id = worker_id, executed = executed, "Worker thread exiting");
            shared
                .sink
                .log(LogLevel::Info, &format!("worker {worker_id} stopped"));
        })
}

fn run_task(worker_id: usize, shared: &PoolShared, task: PriorityTask) {
    let task_id = task.id();
    let ready_at = task.scheduled_time();
    let cancelled = task
        .cancel_token()
        .is_some_and(CancellationToken::is_cancelled);

    shared.active.fetch_add(1, Ordering::Relaxed);
    let mut payload = task.into_payload();

    let status = if cancelled {
        payload.abandon(SchedulerError::TaskCancelled)
    } else if let Err(refused) = shared.breaker.try_acquire() {
        payload.abandon(refused)
    } else {
        debug!(worker_id = worker_id, task_id = task_id, "Worker executing task");
        payload.run()
    };

    match &status {
        JobStatus::Completed => {
            let latency = Instant::now().saturating_duration_since(ready_at);
            shared.metrics.record_completed(latency);
            shared.breaker.on_success();
        }
        JobStatus::Failed(reason) => {
            shared.metrics.record_failed();
            shared.breaker.on_failure();
            warn!(worker_id = worker_id, task_id = task_id, error = %reason, "Task failed");
            shared
                .sink
                .log(LogLevel::Warn, &format!("task {task_id} failed: {reason}"));
        }
        JobStatus::Cancelled => {
            shared.metrics.record_cancelled();
            debug!(worker_id = worker_id, task_id = task_id, "Task cancelled");
        }
        JobStatus::Rejected => {
            shared.metrics.record_failed();
            debug!(worker_id = worker_id, task_id = task_id, "Task refused by open circuit");
        }
    }

    payload.deliver();
    shared.active.fetch_sub(1, Ordering::Relaxed);
    shared.tracker.finish();
}
