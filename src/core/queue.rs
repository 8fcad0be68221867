//! Priority task queue with interchangeable backing strategies.
//!
//! [`TaskQueue`] is the front every worker contends on. It owns exactly one
//! active [`QueueStrategy`] behind a `RwLock`: steady-state push/pop take the
//! read side, and only a strategy switch or close takes the write side to
//! drain the old backing structure into the new one.
//!
//! Depth is tracked in a single atomic reserved with a CAS loop before the
//! insert, so capacity is enforced exactly under both strategies.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::core::{PriorityTask, SchedulerError};
use crate::infra::queue::{LockedQueue, ShardedQueue};

/// Backing strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Single mutex + condition variable over one heap.
    Locked,
    /// Per-worker shards with fine-grained locks and optional stealing.
    Sharded,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "locked"),
            Self::Sharded => write!(f, "sharded"),
        }
    }
}

/// Result of a strategy-level blocking pop.
#[derive(Debug)]
pub enum StrategyPop {
    /// A ready task was removed.
    Task(PriorityTask),
    /// The caller's deadline passed with no ready task.
    TimedOut,
    /// The strategy was interrupted (retired by a switch, or closed) and has
    /// no ready task left.
    Interrupted,
}

/// Result of [`TaskQueue::pop_blocking`].
#[derive(Debug)]
pub enum PopResult {
    /// The highest-priority ready task.
    Popped(PriorityTask),
    /// The deadline passed with no ready task.
    TimedOut,
    /// The queue is closed and holds no more runnable tasks.
    Shutdown,
}

/// Backing structure for [`TaskQueue`].
///
/// Implementations synchronize internally. Future-scheduled tasks must be held
/// back until their ready time without spinning, and `pop_wait` must return
/// promptly once [`interrupt`](Self::interrupt) has been called.
pub trait QueueStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;
    /// Insert a task. Capacity is enforced by the caller.
    fn push(&self, task: PriorityTask);
    /// Remove the best ready task for `worker` without blocking.
    fn try_pop(&self, worker: usize, now: Instant) -> Option<PriorityTask>;
    /// Block until a ready task, `deadline`, or interruption.
    fn pop_wait(&self, worker: usize, deadline: Option<Instant>) -> StrategyPop;
    /// Number of tasks held, ready and delayed.
    fn len(&self) -> usize;
    /// Whether no task is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Wake every waiter and make further waits return immediately.
    fn interrupt(&self);
    /// Remove every task.
    fn drain(&self) -> Vec<PriorityTask>;
    /// Remove tasks whose ready time is still after `now`.
    fn drain_delayed(&self, now: Instant) -> Vec<PriorityTask>;
}

/// Heap entry ordering ready tasks: priority, then earlier scheduled time,
/// then lower id.
pub(crate) struct ReadyEntry(pub(crate) PriorityTask);

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: larger compares first.
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.scheduled_time().cmp(&self.0.scheduled_time()))
            .then_with(|| other.0.id().cmp(&self.0.id()))
    }
}

/// Heap entry ordering delayed tasks by earliest ready time.
pub(crate) struct DelayedEntry(pub(crate) PriorityTask);

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .scheduled_time()
            .cmp(&self.0.scheduled_time())
            .then_with(|| other.0.id().cmp(&self.0.id()))
    }
}

/// Lock-contention counters shared by the queue and the adaptive selector.
#[derive(Debug, Default)]
pub struct QueueContention {
    operations: AtomicU64,
    contended: AtomicU64,
    wait_nanos: AtomicU64,
}

/// Counters accumulated over one sampling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentionWindow {
    /// Lock acquisitions performed.
    pub operations: u64,
    /// Acquisitions that found the lock held.
    pub contended: u64,
    /// Total time spent blocked on contended acquisitions.
    pub wait: Duration,
}

impl QueueContention {
    /// Count one queue lock acquisition.
    pub fn record_op(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one contended acquisition and the time spent blocked.
    pub fn record_wait(&self, waited: Duration) {
        self.contended.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Read and reset the counters.
    pub fn take_window(&self) -> ContentionWindow {
        ContentionWindow {
            operations: self.operations.swap(0, Ordering::Relaxed),
            contended: self.contended.swap(0, Ordering::Relaxed),
            wait: Duration::from_nanos(self.wait_nanos.swap(0, Ordering::Relaxed)),
        }
    }
}

/// Acquire `mutex`, recording whether the caller had to wait for it.
pub(crate) fn lock_measured<'a, T>(
    mutex: &'a Mutex<T>,
    contention: &QueueContention,
) -> MutexGuard<'a, T> {
    contention.record_op();
    if let Some(guard) = mutex.try_lock() {
        return guard;
    }
    let started = Instant::now();
    let guard = mutex.lock();
    contention.record_wait(started.elapsed());
    guard
}

/// Earlier of two optional instants.
pub(crate) fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Concurrent max-priority queue with a live-switchable backing strategy.
pub struct TaskQueue {
    active: RwLock<Box<dyn QueueStrategy>>,
    /// Serializes strategy switches and close.
    switch_lock: Mutex<()>,
    depth: AtomicUsize,
    capacity: usize,
    shards: usize,
    work_stealing: bool,
    closed: AtomicBool,
    contention: Arc<QueueContention>,
    switches: AtomicU64,
}

impl TaskQueue {
    /// Create a queue.
    ///
    /// `shards` is the shard count used whenever the sharded strategy is
    /// active (normally the worker count).
    #[must_use]
    pub fn new(kind: StrategyKind, capacity: usize, shards: usize, work_stealing: bool) -> Self {
        let contention = Arc::new(QueueContention::default());
        let shards = shards.max(1);
        let strategy = build_strategy(kind, shards, work_stealing, &contention);
        Self {
            active: RwLock::new(strategy),
            switch_lock: Mutex::new(()),
            depth: AtomicUsize::new(0),
            capacity,
            shards,
            work_stealing,
            closed: AtomicBool::new(false),
            contention,
            switches: AtomicU64::new(0),
        }
    }

    /// Reserve one slot of capacity using a CAS loop.
    fn try_reserve(&self) -> bool {
        let mut current = self.depth.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.depth.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Insert a task.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::SystemShuttingDown` once the queue is closed
    /// - `SchedulerError::QueueFull` if capacity is exhausted
    pub fn push(&self, task: PriorityTask) -> Result<(), SchedulerError> {
        let strategy = self.active.read();
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::SystemShuttingDown);
        }
        if !self.try_reserve() {
            return Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            });
        }
        strategy.push(task);
        Ok(())
    }

    /// Remove the highest-priority ready task, blocking until one is ready,
    /// `deadline` passes, or the queue is closed and empty.
    pub fn pop_blocking(&self, worker: usize, deadline: Option<Instant>) -> PopResult {
        loop {
            let strategy = self.active.read();
            match strategy.pop_wait(worker, deadline) {
                StrategyPop::Task(task) => {
                    self.depth.fetch_sub(1, Ordering::AcqRel);
                    return PopResult::Popped(task);
                }
                StrategyPop::TimedOut => return PopResult::TimedOut,
                StrategyPop::Interrupted => {
                    drop(strategy);
                    if self.closed.load(Ordering::Acquire) {
                        return PopResult::Shutdown;
                    }
                    // A switch is in progress; the next read blocks until it completes.
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Remove the best ready task without blocking.
    pub fn try_pop(&self, worker: usize) -> Option<PriorityTask> {
        let strategy = self.active.read();
        let task = strategy.try_pop(worker, Instant::now())?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(task)
    }

    /// Current depth, including delayed tasks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether the queue holds no task.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Depth as a fraction of capacity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.size() as f64 / self.capacity as f64
    }

    /// Active strategy.
    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        self.active.read().kind()
    }

    /// Number of completed strategy switches.
    #[must_use]
    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    /// Contention counters fed by the active strategy.
    #[must_use]
    pub fn contention(&self) -> &QueueContention {
        &self.contention
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Replace the backing strategy, moving every queued task across.
    ///
    /// Returns the number of tasks moved, or `None` if `kind` is already
    /// active or the queue is closed. A task count mismatch after the move is
    /// an unrecoverable invariant violation and aborts the process.
    pub fn switch_strategy(&self, kind: StrategyKind) -> Option<usize> {
        let _switching = self.switch_lock.lock();
        {
            let current = self.active.read();
            if current.kind() == kind || self.is_closed() {
                return None;
            }
            // Release workers parked inside the old strategy so the write lock can be taken.
            current.interrupt();
        }

        let mut active = self.active.write();
        if self.is_closed() {
            return None;
        }

        let from = active.kind();
        let expected = self.depth.load(Ordering::Acquire);
        let tasks = active.drain();
        if tasks.len() != expected {
            error!(
                expected = expected,
                drained = tasks.len(),
                "task count mismatch while draining queue strategy"
            );
            std::process::abort();
        }

        let replacement = build_strategy(kind, self.shards, self.work_stealing, &self.contention);
        for task in tasks {
            replacement.push(task);
        }
        if replacement.len() != expected {
            error!(
                expected = expected,
                inserted = replacement.len(),
                "task count mismatch while refilling queue strategy"
            );
            std::process::abort();
        }

        *active = replacement;
        self.switches.fetch_add(1, Ordering::Relaxed);
        info!(from = %from, to = %kind, moved = expected, "Queue strategy switched");
        Some(expected)
    }

    /// Stop accepting tasks and wake every waiting worker.
    ///
    /// With `graceful`, ready tasks stay queued for workers to drain and only
    /// tasks whose ready time is still in the future are removed. Otherwise
    /// every queued task is removed. Removed tasks are returned so the caller
    /// can mark them cancelled. Subsequent calls return an empty list.
    pub fn close(&self, graceful: bool) -> Vec<PriorityTask> {
        let _switching = self.switch_lock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        self.active.read().interrupt();

        let active = self.active.write();
        let removed = if graceful {
            active.drain_delayed(Instant::now())
        } else {
            active.drain()
        };
        self.depth.fetch_sub(removed.len(), Ordering::AcqRel);
        debug!(graceful = graceful, removed = removed.len(), "Task queue closed");
        removed
    }

    /// Remove every task still held after close. Empty unless a task was
    /// stranded where no remaining worker could reach it.
    pub(crate) fn drain_remaining(&self) -> Vec<PriorityTask> {
        let _switching = self.switch_lock.lock();
        let removed = self.active.write().drain();
        self.depth.fetch_sub(removed.len(), Ordering::AcqRel);
        removed
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("strategy", &self.strategy())
            .field("depth", &self.size())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn build_strategy(
    kind: StrategyKind,
    shards: usize,
    work_stealing: bool,
    contention: &Arc<QueueContention>,
) -> Box<dyn QueueStrategy> {
    match kind {
        StrategyKind::Locked => Box::new(LockedQueue::new(Arc::clone(contention))),
        StrategyKind::Sharded => Box::new(ShardedQueue::new(
            shards,
            work_stealing,
            Arc::clone(contention),
        )),
    }
}
