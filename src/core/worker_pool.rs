//! Fixed pool of OS worker threads draining the shared task queue.
//!
//! Submission goes through three admission checks in order: shutdown, circuit
//! breaker, queue capacity. Every accepted task is counted as outstanding
//! until a worker (or shutdown) brings it to a terminal state, which is what
//! [`WorkerPool::wait_for_completion`] waits on.
//!
//! # Example
//!
//! ```rust,no_run
//! use prometheus_task_engine::config::EngineConfig;
//! use prometheus_task_engine::core::WorkerPool;
//! use prometheus_task_engine::util::Priority;
//!
//! let pool = WorkerPool::new(&EngineConfig::new().with_worker_count(2))?;
//! let handle = pool.submit(Priority::HIGH, || Ok(6 * 7))?;
//! assert_eq!(handle.get(None)?, 42);
//! pool.shutdown(true);
//! # Ok::<(), prometheus_task_engine::core::SchedulerError>(())
//! ```

mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::{
    AppResult, CancellationToken, CircuitBreaker, CircuitState, LogLevel, LogSink,
    MetricsCollector, PriorityTask, SchedulerError, StrategyKind, TaskHandle, TaskQueue,
    TracingLogSink,
};
use crate::util::types::{Priority, TaskId};

/// Pool utilization snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks waiting in the queue, including delayed ones.
    pub queued_tasks: usize,
    /// Accepted tasks not yet terminal.
    pub outstanding_tasks: u64,
    /// Active queue strategy.
    pub strategy: StrategyKind,
    /// Completed strategy switches.
    pub strategy_switches: u64,
    /// Breaker state.
    pub circuit_state: CircuitState,
    /// Total tasks accepted.
    pub submitted_tasks: u64,
    /// Total tasks completed successfully.
    pub completed_tasks: u64,
    /// Total tasks that failed.
    pub failed_tasks: u64,
    /// Total tasks cancelled.
    pub cancelled_tasks: u64,
}

/// Counts accepted tasks until they reach a terminal state.
#[derive(Debug, Default)]
struct CompletionTracker {
    outstanding: Mutex<u64>,
    idle: Condvar,
}

impl CompletionTracker {
    fn begin(&self) {
        *self.outstanding.lock() += 1;
    }

    fn finish(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn outstanding(&self) -> u64 {
        *self.outstanding.lock()
    }

    fn wait_idle(&self, deadline: Option<Instant>) -> bool {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut outstanding, deadline).timed_out() {
                        return *outstanding == 0;
                    }
                }
                None => self.idle.wait(&mut outstanding),
            }
        }
        true
    }
}

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) sink: Arc<dyn LogSink>,
    tracker: CompletionTracker,
    active: AtomicU64,
}

impl PoolShared {
    /// Mark tasks removed by shutdown as cancelled.
    fn cancel_removed(&self, removed: Vec<PriorityTask>) {
        for task in removed {
            task.abandon(SchedulerError::TaskCancelled);
            self.metrics.record_cancelled();
            self.tracker.finish();
        }
    }
}

/// Worker threads plus the queue, breaker and metrics they share.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    accepting: AtomicBool,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Validate `config` and start the workers, logging to `tracing`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if validation fails
    /// - `SchedulerError::Internal` if a worker thread cannot be spawned
    pub fn new(config: &EngineConfig) -> Result<Self, SchedulerError> {
        Self::with_sink(config, Arc::new(TracingLogSink))
    }

    /// Validate `config` and start the workers, reporting lifecycle events to
    /// `sink`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_sink(config: &EngineConfig, sink: Arc<dyn LogSink>) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let worker_count = config.resolved_worker_count();

        let shared = Arc::new(PoolShared {
            queue: Arc::new(TaskQueue::new(
                config.initial_strategy,
                config.max_queue_capacity,
                worker_count,
                config.work_stealing,
            )),
            breaker: Arc::new(CircuitBreaker::with_sink(
                config.circuit_breaker.clone(),
                Arc::clone(&sink),
            )),
            metrics: Arc::new(MetricsCollector::new(config.latency_sample_capacity)),
            sink,
            tracker: CompletionTracker::default(),
            active: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            match worker::spawn_worker(worker_id, Arc::clone(&shared), config.thread_stack_size) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Release the workers already running before reporting.
                    shared.queue.close(false);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = worker_count,
            capacity = config.max_queue_capacity,
            strategy = %config.initial_strategy,
            work_stealing = config.work_stealing,
            "WorkerPool initialized"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
            accepting: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        })
    }

    fn admit(&self, task: PriorityTask) -> Result<(), SchedulerError> {
        let shared = &self.shared;
        let admitted = if self.accepting.load(Ordering::Acquire) {
            shared.breaker.try_acquire()
        } else {
            Err(SchedulerError::SystemShuttingDown)
        };
        if let Err(err) = admitted {
            shared.metrics.record_rejected();
            return Err(err);
        }

        let task_id = task.id();
        shared.tracker.begin();
        if let Err(err) = shared.queue.push(task) {
            shared.tracker.finish();
            shared.metrics.record_rejected();
            debug!(task_id = task_id, error = %err, "Task rejected at admission");
            return Err(err);
        }
        shared.metrics.record_submitted();
        debug!(task_id = task_id, "Task submitted");
        Ok(())
    }

    fn next_task_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue `body` to run as soon as a worker is free.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::SystemShuttingDown` after shutdown began
    /// - `SchedulerError::CircuitOpen` while the breaker is open
    /// - `SchedulerError::QueueFull` if the queue is at capacity
    pub fn submit<F, T>(&self, priority: Priority, body: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_at(priority, Instant::now(), body)
    }

    /// Enqueue `body` to run no earlier than `ready_at`.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn submit_at<F, T>(
        &self,
        priority: Priority,
        ready_at: Instant,
        body: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) =
            PriorityTask::with_handle(self.next_task_id(), priority, ready_at, None, body);
        self.admit(task)?;
        Ok(handle)
    }

    /// Enqueue `body` with a cancellation token.
    ///
    /// If `token` is cancelled before a worker starts the task, the payload
    /// never runs and the handle reports `Cancelled`. The payload receives the
    /// token to poll while it runs.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn submit_cancellable<F, T>(
        &self,
        token: CancellationToken,
        priority: Priority,
        body: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce(&CancellationToken) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = token.clone();
        let (task, handle) = PriorityTask::with_handle(
            self.next_task_id(),
            priority,
            Instant::now(),
            Some(token),
            move || body(&inner),
        );
        self.admit(task)?;
        Ok(handle)
    }

    /// Block until no task is queued or executing.
    ///
    /// Returns `false` if `timeout` elapses first. A timeout too large to
    /// represent as an instant waits without a deadline.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        self.shared.tracker.wait_idle(deadline)
    }

    /// Stop accepting work and join the workers. Idempotent.
    ///
    /// With `graceful`, ready tasks are drained by the workers and tasks whose
    /// ready time is still in the future are cancelled. Otherwise every
    /// pending task is cancelled; in-flight tasks run to completion either way.
    pub fn shutdown(&self, graceful: bool) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(graceful = graceful, "Shutting down worker pool");
            let removed = self.shared.queue.close(graceful);
            if !removed.is_empty() {
                debug!(cancelled = removed.len(), "Cancelled pending tasks at shutdown");
            }
            self.shared.cancel_removed(removed);
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let joined = workers.len();
        for (worker_id, handle) in workers.into_iter().enumerate() {
            if handle.join().is_err() {
                warn!(worker_id = worker_id, "Worker thread panicked");
            }
        }
        if joined > 0 {
            let stranded = self.shared.queue.drain_remaining();
            if !stranded.is_empty() {
                warn!(cancelled = stranded.len(), "Cancelled tasks left after workers exited");
                self.shared.cancel_removed(stranded);
            }
            info!(worker_count = joined, "Worker pool shut down complete");
        }
    }

    /// Whether the pool still accepts submissions.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let metrics = shared.metrics.snapshot();
        PoolStats {
            worker_count: self.worker_count,
            active_tasks: shared.active.load(Ordering::Relaxed),
            queued_tasks: shared.queue.size(),
            outstanding_tasks: shared.tracker.outstanding(),
            strategy: shared.queue.strategy(),
            strategy_switches: shared.queue.switch_count(),
            circuit_state: shared.breaker.state(),
            submitted_tasks: metrics.tasks_submitted,
            completed_tasks: metrics.tasks_completed,
            failed_tasks: metrics.tasks_failed,
            cancelled_tasks: metrics.tasks_cancelled,
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Shared task queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    /// Shared circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.shared.breaker
    }

    /// Shared metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.shared.metrics
    }

    /// Lifecycle sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.shared.sink
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a long-running payload.
        if self.accepting.swap(false, Ordering::AcqRel) {
            let removed = self.shared.queue.close(false);
            self.shared.cancel_removed(removed);
            self.shared
                .sink
                .log(LogLevel::Debug, "worker pool dropped without shutdown; workers detached");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("accepting", &self.is_accepting())
            .field("queue", &self.shared.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InMemoryLogSink, TaskOutcome};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(&EngineConfig::new().with_worker_count(workers)).unwrap()
    }

    #[test]
    fn test_submit_returns_value() {
        let pool = pool(2);
        let handle = pool.submit(Priority::NORMAL, || Ok("done")).unwrap();
        assert_eq!(handle.get(Some(Duration::from_secs(5))).unwrap(), "done");
        pool.shutdown(true);
    }

    #[test]
    fn test_failure_does_not_kill_worker() {
        let pool = pool(1);
        let failed = pool
            .submit::<_, ()>(Priority::NORMAL, || Err(anyhow::anyhow!("bad input")))
            .unwrap();
        let panicked = pool
            .submit::<_, ()>(Priority::NORMAL, || panic!("worker must survive"))
            .unwrap();
        let ok = pool.submit(Priority::NORMAL, || Ok(1)).unwrap();

        assert!(matches!(
            failed.wait(),
            TaskOutcome::Failed(SchedulerError::TaskPayloadFailed(_))
        ));
        assert!(panicked.wait().is_failed());
        assert_eq!(ok.get(Some(Duration::from_secs(5))).unwrap(), 1);
        assert!(pool.wait_for_completion(Some(Duration::from_secs(5))));
        assert_eq!(pool.stats().failed_tasks, 2);
        pool.shutdown(true);
    }

    #[test]
    fn test_cancelled_token_skips_payload() {
        let pool = pool(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel();
        let counter = Arc::clone(&runs);
        let handle = pool
            .submit_cancellable(token, Priority::NORMAL, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(handle.wait().is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        pool.shutdown(true);
    }

    #[test]
    fn test_wait_for_completion_times_out() {
        let pool = pool(1);
        pool.submit(Priority::NORMAL, || {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .unwrap();
        assert!(!pool.wait_for_completion(Some(Duration::from_millis(10))));
        assert!(pool.wait_for_completion(Some(Duration::from_secs(5))));
        pool.shutdown(true);
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        let pool = pool(1);
        pool.submit(Priority::NORMAL, || {
            thread::sleep(Duration::from_millis(5));
            Ok(())
        })
        .unwrap();
        assert!(pool.wait_for_completion(Some(Duration::MAX)));
        pool.shutdown(true);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let pool = pool(1);
        pool.shutdown(true);
        pool.shutdown(false);
        assert!(matches!(
            pool.submit(Priority::NORMAL, || Ok(())),
            Err(SchedulerError::SystemShuttingDown)
        ));
        assert_eq!(pool.metrics().snapshot().tasks_rejected, 1);
    }

    #[test]
    fn test_worker_lifecycle_reaches_sink() {
        let sink = Arc::new(InMemoryLogSink::new(64));
        let pool = WorkerPool::with_sink(&EngineConfig::new().with_worker_count(2), sink.clone())
            .unwrap();
        pool.shutdown(true);
        assert!(sink.contains("worker 0 started"));
        assert!(sink.contains("worker 1 stopped"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = EngineConfig::new().with_max_queue_capacity(0);
        assert!(matches!(
            WorkerPool::new(&cfg),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
