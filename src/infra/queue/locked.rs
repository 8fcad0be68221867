//! Locked queue strategy: one mutex and condition variable over a heap.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::core::queue::{earliest, lock_measured, DelayedEntry, ReadyEntry};
use crate::core::{PriorityTask, QueueContention, QueueStrategy, StrategyKind, StrategyPop};

/// Ready and delayed heaps.
///
/// Tasks whose ready time is in the future wait in `delayed` (earliest first)
/// and are promoted into `ready` once due, so a far-future high-priority task
/// never blocks lower-priority tasks that can run now.
#[derive(Default)]
struct TaskHeap {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<DelayedEntry>,
}

impl TaskHeap {
    fn push(&mut self, task: PriorityTask, now: Instant) {
        if task.is_ready(now) {
            self.ready.push(ReadyEntry(task));
        } else {
            self.delayed.push(DelayedEntry(task));
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|entry| entry.0.is_ready(now))
        {
            if let Some(DelayedEntry(task)) = self.delayed.pop() {
                self.ready.push(ReadyEntry(task));
            }
        }
    }

    fn pop_ready(&mut self) -> Option<PriorityTask> {
        self.ready.pop().map(|entry| entry.0)
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.delayed.peek().map(|entry| entry.0.scheduled_time())
    }

    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }
}

struct LockedState {
    heap: TaskHeap,
    interrupted: bool,
}

/// Single mutex + condition variable guarding a binary heap.
///
/// Every push and pop serializes on one lock. Simple and exact: ordering is
/// the global priority / ready-time order.
pub struct LockedQueue {
    state: Mutex<LockedState>,
    available: Condvar,
    contention: Arc<QueueContention>,
}

impl LockedQueue {
    /// Create an empty locked queue reporting into `contention`.
    #[must_use]
    pub fn new(contention: Arc<QueueContention>) -> Self {
        Self {
            state: Mutex::new(LockedState {
                heap: TaskHeap::default(),
                interrupted: false,
            }),
            available: Condvar::new(),
            contention,
        }
    }
}

impl QueueStrategy for LockedQueue {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Locked
    }

    fn push(&self, task: PriorityTask) {
        let mut state = lock_measured(&self.state, &self.contention);
        state.heap.push(task, Instant::now());
        drop(state);
        self.available.notify_one();
    }

    fn try_pop(&self, _worker: usize, now: Instant) -> Option<PriorityTask> {
        let mut state = lock_measured(&self.state, &self.contention);
        state.heap.promote_due(now);
        state.heap.pop_ready()
    }

    fn pop_wait(&self, _worker: usize, deadline: Option<Instant>) -> StrategyPop {
        let mut state = lock_measured(&self.state, &self.contention);
        loop {
            let now = Instant::now();
            state.heap.promote_due(now);
            if let Some(task) = state.heap.pop_ready() {
                if !state.heap.ready.is_empty() {
                    // Promotion may have released several tasks at once.
                    self.available.notify_one();
                }
                return StrategyPop::Task(task);
            }
            if state.interrupted {
                return StrategyPop::Interrupted;
            }
            if deadline.is_some_and(|d| now >= d) {
                return StrategyPop::TimedOut;
            }

            match earliest(deadline, state.heap.next_ready_at()) {
                Some(wake_at) => {
                    self.available.wait_until(&mut state, wake_at);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        drop(state);
        self.available.notify_all();
    }

    fn drain(&self) -> Vec<PriorityTask> {
        let mut state = self.state.lock();
        let heap = std::mem::take(&mut state.heap);
        heap.ready
            .into_iter()
            .map(|entry| entry.0)
            .chain(heap.delayed.into_iter().map(|entry| entry.0))
            .collect()
    }

    fn drain_delayed(&self, now: Instant) -> Vec<PriorityTask> {
        let mut state = self.state.lock();
        state.heap.promote_due(now);
        std::mem::take(&mut state.heap.delayed)
            .into_iter()
            .map(|entry| entry.0)
            .collect()
    }
}
