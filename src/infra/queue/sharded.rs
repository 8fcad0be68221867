//! Sharded queue strategy for high submission contention.
//!
//! One heap per worker, each behind its own cache-padded lock. Pushes pick a
//! shard round-robin and take the first one whose lock is free, so concurrent
//! submitters rarely collide. Workers pop their home shard first and, with
//! work stealing enabled, fall back to the other shards.
//!
//! Idle workers park on a single condition variable, but pushers only touch
//! its lock when the atomic sleeper count says someone is parked. The sleeper
//! count and the ready counters are both `SeqCst`, so a pusher either sees the
//! sleeper or the sleeper's re-check sees the pushed task.
//!
//! Once interrupted (shutdown or a strategy switch) every worker may take
//! from any shard and due delayed tasks land on the promoting worker's own
//! shard, so no task is left on the shard of a worker that already exited.
//!
//! Ordering is exact within a shard and approximate across shards: two
//! equal-priority tasks on different shards may run in either order, and a
//! worker may run a lower-priority task from its home shard while another
//! shard holds a higher-priority one.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};

use crate::core::queue::{earliest, lock_measured, DelayedEntry, ReadyEntry};
use crate::core::{PriorityTask, QueueContention, QueueStrategy, StrategyKind, StrategyPop};

#[derive(Default)]
struct Shard {
    heap: Mutex<BinaryHeap<ReadyEntry>>,
    len: AtomicUsize,
}

/// Per-worker heaps with fine-grained locks and optional work stealing.
pub struct ShardedQueue {
    shards: Box<[CachePadded<Shard>]>,
    delayed: Mutex<BinaryHeap<DelayedEntry>>,
    delayed_len: AtomicUsize,
    ready_len: AtomicUsize,
    next_shard: AtomicUsize,
    work_stealing: bool,
    sleepers: AtomicUsize,
    idle: Mutex<()>,
    wakeup: Condvar,
    interrupted: AtomicBool,
    contention: Arc<QueueContention>,
}

impl ShardedQueue {
    /// Create a queue with `shards` sub-queues (at least one).
    #[must_use]
    pub fn new(shards: usize, work_stealing: bool, contention: Arc<QueueContention>) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| CachePadded::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            delayed: Mutex::new(BinaryHeap::new()),
            delayed_len: AtomicUsize::new(0),
            ready_len: AtomicUsize::new(0),
            next_shard: AtomicUsize::new(0),
            work_stealing,
            sleepers: AtomicUsize::new(0),
            idle: Mutex::new(()),
            wakeup: Condvar::new(),
            interrupted: AtomicBool::new(false),
            contention,
        }
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    const fn home_shard(&self, worker: usize) -> usize {
        worker % self.shards.len()
    }

    fn push_to_shard(&self, index: usize, task: PriorityTask) {
        let shard = &self.shards[index];
        let mut heap = lock_measured(&shard.heap, &self.contention);
        heap.push(ReadyEntry(task));
        shard.len.fetch_add(1, Ordering::SeqCst);
        drop(heap);
        self.ready_len.fetch_add(1, Ordering::SeqCst);
    }

    /// Insert a ready task into the first uncontended shard, starting from
    /// the round-robin cursor.
    fn push_ready(&self, task: PriorityTask) {
        let count = self.shards.len();
        let start = self.next_shard.fetch_add(1, Ordering::Relaxed) % count;

        self.contention.record_op();
        let mut task = Some(task);
        for offset in 0..count {
            let shard = &self.shards[(start + offset) % count];
            if let Some(mut heap) = shard.heap.try_lock() {
                if let Some(task) = task.take() {
                    heap.push(ReadyEntry(task));
                }
                shard.len.fetch_add(1, Ordering::SeqCst);
                break;
            }
        }

        if let Some(task) = task {
            let shard = &self.shards[start];
            let started = Instant::now();
            let mut heap = shard.heap.lock();
            self.contention.record_wait(started.elapsed());
            heap.push(ReadyEntry(task));
            shard.len.fetch_add(1, Ordering::SeqCst);
        }

        self.ready_len.fetch_add(1, Ordering::SeqCst);
        self.wake(false);
    }

    fn wake(&self, all: bool) {
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        let _idle = self.idle.lock();
        // Without stealing only the shard owner can take the task, so wake everyone.
        if all || !self.work_stealing {
            self.wakeup.notify_all();
        } else {
            self.wakeup.notify_one();
        }
    }

    fn pop_shard(&self, index: usize) -> Option<PriorityTask> {
        let shard = &self.shards[index];
        if shard.len.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let mut heap = lock_measured(&shard.heap, &self.contention);
        let entry = heap.pop()?;
        shard.len.fetch_sub(1, Ordering::SeqCst);
        self.ready_len.fetch_sub(1, Ordering::SeqCst);
        Some(entry.0)
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Move due delayed tasks into the ready shards.
    ///
    /// After an interrupt the delayed lock is taken unconditionally and the
    /// tasks go to `worker`'s home shard, which that worker pops next.
    fn promote_due(&self, worker: usize, now: Instant) {
        if self.delayed_len.load(Ordering::SeqCst) == 0 {
            return;
        }
        let draining = self.is_interrupted();
        let mut delayed = if draining {
            lock_measured(&self.delayed, &self.contention)
        } else {
            let Some(delayed) = self.delayed.try_lock() else {
                // Another worker is promoting.
                return;
            };
            delayed
        };
        let mut due = Vec::new();
        while delayed.peek().is_some_and(|entry| entry.0.is_ready(now)) {
            if let Some(DelayedEntry(task)) = delayed.pop() {
                due.push(task);
            }
        }
        self.delayed_len.fetch_sub(due.len(), Ordering::SeqCst);
        drop(delayed);

        if draining {
            let home = self.home_shard(worker);
            for task in due {
                self.push_to_shard(home, task);
            }
        } else {
            for task in due {
                self.push_ready(task);
            }
        }
    }

    fn next_delayed_at(&self) -> Option<Instant> {
        if self.delayed_len.load(Ordering::SeqCst) == 0 {
            return None;
        }
        self.delayed.lock().peek().map(|entry| entry.0.scheduled_time())
    }

    fn has_work_for(&self, worker: usize, now: Instant) -> bool {
        let ready = if self.work_stealing || self.is_interrupted() {
            self.ready_len.load(Ordering::SeqCst) > 0
        } else {
            self.shards[self.home_shard(worker)].len.load(Ordering::SeqCst) > 0
        };
        ready || self.next_delayed_at().is_some_and(|at| at <= now)
    }
}

impl QueueStrategy for ShardedQueue {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sharded
    }

    fn push(&self, task: PriorityTask) {
        if task.is_ready(Instant::now()) {
            self.push_ready(task);
            return;
        }
        let mut delayed = lock_measured(&self.delayed, &self.contention);
        delayed.push(DelayedEntry(task));
        self.delayed_len.fetch_add(1, Ordering::SeqCst);
        drop(delayed);
        // Sleepers may be waiting on a later ready time.
        self.wake(true);
    }

    fn try_pop(&self, worker: usize, now: Instant) -> Option<PriorityTask> {
        self.promote_due(worker, now);

        let home = self.home_shard(worker);
        if let Some(task) = self.pop_shard(home) {
            return Some(task);
        }
        if !self.work_stealing && !self.is_interrupted() {
            return None;
        }
        let count = self.shards.len();
        (1..count).find_map(|offset| self.pop_shard((home + offset) % count))
    }

    fn pop_wait(&self, worker: usize, deadline: Option<Instant>) -> StrategyPop {
        let backoff = Backoff::new();
        loop {
            let now = Instant::now();
            if let Some(task) = self.try_pop(worker, now) {
                return StrategyPop::Task(task);
            }
            if self.is_interrupted() {
                // The pop above may have predated the interrupt; retry with stealing on.
                return match self.try_pop(worker, Instant::now()) {
                    Some(task) => StrategyPop::Task(task),
                    None => StrategyPop::Interrupted,
                };
            }
            if deadline.is_some_and(|d| now >= d) {
                return StrategyPop::TimedOut;
            }
            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            let mut idle = self.idle.lock();
            self.sleepers.fetch_add(1, Ordering::SeqCst);
            if self.has_work_for(worker, Instant::now()) || self.is_interrupted() {
                self.sleepers.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            match earliest(deadline, self.next_delayed_at()) {
                Some(wake_at) => {
                    self.wakeup.wait_until(&mut idle, wake_at);
                }
                None => self.wakeup.wait(&mut idle),
            }
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
            drop(idle);
            backoff.reset();
        }
    }

    fn len(&self) -> usize {
        self.ready_len.load(Ordering::SeqCst) + self.delayed_len.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        let _idle = self.idle.lock();
        self.wakeup.notify_all();
    }

    fn drain(&self) -> Vec<PriorityTask> {
        let mut tasks = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let mut heap = shard.heap.lock();
            let drained = heap.len();
            tasks.extend(heap.drain().map(|entry| entry.0));
            shard.len.fetch_sub(drained, Ordering::SeqCst);
            self.ready_len.fetch_sub(drained, Ordering::SeqCst);
        }
        let mut delayed = self.delayed.lock();
        let drained = delayed.len();
        tasks.extend(delayed.drain().map(|entry| entry.0));
        self.delayed_len.fetch_sub(drained, Ordering::SeqCst);
        tasks
    }

    fn drain_delayed(&self, now: Instant) -> Vec<PriorityTask> {
        let mut delayed = self.delayed.lock();
        let (due, future): (Vec<_>, Vec<_>) = delayed
            .drain()
            .map(|entry| entry.0)
            .partition(|task| task.is_ready(now));
        self.delayed_len.fetch_sub(future.len(), Ordering::SeqCst);
        delayed.extend(due.into_iter().map(DelayedEntry));
        future
    }
}
