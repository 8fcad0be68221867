//! Coordinator thread: recurring sweeps and adaptive strategy sampling.
//!
//! The thread wakes every scheduler tick, sweeps the recurring registry and,
//! once per sampling interval, lets the adaptive selector judge the last
//! window of queue contention. Stopping wakes it immediately.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::{AdaptiveStrategySelector, LogLevel, RecurringScheduler, WorkerPool};
use crate::util::clock::instant_after;

/// Everything the coordinator loop reads.
pub(crate) struct CoordinatorContext {
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) scheduler: Arc<RecurringScheduler>,
    pub(crate) selector: Arc<AdaptiveStrategySelector>,
    pub(crate) tick: Duration,
    pub(crate) adaptive: bool,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Sleep until `deadline` or a stop request. Returns `true` once stopped.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }
}

/// Handle to the running coordinator thread.
pub(crate) struct Coordinator {
    signal: Arc<StopSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Start the coordinator thread.
    pub(crate) fn start(ctx: CoordinatorContext) -> io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("task-coordinator".into())
            .spawn(move || run(&ctx, &thread_signal))?;
        Ok(Self {
            signal,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop and join the thread. Idempotent.
    pub(crate) fn stop(&self) {
        self.signal.stop();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Coordinator thread panicked");
            }
        }
    }
}

fn run(ctx: &CoordinatorContext, signal: &StopSignal) {
    let sampling_interval = ctx.selector.config().sampling_interval();
    let mut next_sample = instant_after(sampling_interval);
    debug!(tick_ms = ctx.tick.as_millis(), adaptive = ctx.adaptive, "Coordinator started");

    loop {
        let mut wake_at = instant_after(ctx.tick);
        if ctx.adaptive {
            wake_at = wake_at.min(next_sample);
        }
        if signal.wait_until(wake_at) {
            break;
        }

        let now = Instant::now();
        let fired = ctx.scheduler.sweep(&ctx.pool, now);
        if fired > 0 {
            debug!(fired = fired, "Recurring tasks submitted");
        }

        if ctx.adaptive && now >= next_sample {
            if let Some(kind) = ctx.selector.sample_and_adapt(ctx.pool.queue()) {
                info!(strategy = %kind, "Adaptive selector switched queue strategy");
                ctx.pool
                    .sink()
                    .log(LogLevel::Info, &format!("queue strategy switched to {kind}"));
            }
            next_sample = instant_after(sampling_interval);
        }
    }

    debug!("Coordinator stopped");
}
