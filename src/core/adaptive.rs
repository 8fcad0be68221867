//! Live queue-strategy selection from observed lock contention.
//!
//! Each sampling window turns the queue's contention counters into a
//! [`QueueStrategySample`]. A run of `consecutive_windows` contended windows
//! (average wait at or above the high-water mark with enough throughput to
//! matter) moves the queue to the sharded strategy; a run of quiet windows
//! (average wait at or below the low-water mark, or throughput below the
//! minimum) moves it back to the locked one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::AdaptiveConfig;
use crate::core::{ContentionWindow, StrategyKind, TaskQueue};
use crate::util::clock::now_ms;

/// One sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueStrategySample {
    /// Lock acquisitions that found the lock held.
    pub contention_count: u64,
    /// Queue lock acquisitions per second.
    pub throughput: f64,
    /// Mean blocked time per contended acquisition.
    pub avg_wait: Duration,
    /// Strategy active during the window.
    pub strategy: StrategyKind,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
}

impl QueueStrategySample {
    /// Build a sample from raw counters gathered over `elapsed`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_window(window: ContentionWindow, elapsed: Duration, strategy: StrategyKind) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            window.operations as f64 / secs
        } else {
            0.0
        };
        let avg_wait = u32::try_from(window.contended)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| window.wait / n);
        Self {
            contention_count: window.contended,
            throughput,
            avg_wait,
            strategy,
            timestamp_ms: now_ms(),
        }
    }
}

#[derive(Debug)]
struct SelectorState {
    history: VecDeque<QueueStrategySample>,
    hot_streak: u32,
    quiet_streak: u32,
    window_started: Instant,
}

/// Decides when the task queue should change strategy.
#[derive(Debug)]
pub struct AdaptiveStrategySelector {
    config: AdaptiveConfig,
    state: Mutex<SelectorState>,
}

impl AdaptiveStrategySelector {
    /// Create a selector with an empty history.
    #[must_use]
    pub fn new(config: AdaptiveConfig) -> Self {
        let history_len = config.history_len.max(1);
        Self {
            config,
            state: Mutex::new(SelectorState {
                history: VecDeque::with_capacity(history_len),
                hot_streak: 0,
                quiet_streak: 0,
                window_started: Instant::now(),
            }),
        }
    }

    /// Selector configuration.
    #[must_use]
    pub const fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Record `sample` and return the strategy to switch to, if any.
    ///
    /// Streaks only count toward the strategy that is not already active,
    /// and both reset once a switch is recommended.
    pub fn evaluate(&self, current: StrategyKind, sample: QueueStrategySample) -> Option<StrategyKind> {
        let high_water = Duration::from_nanos(self.config.high_water_wait_ns);
        let low_water = Duration::from_nanos(self.config.low_water_wait_ns);
        #[allow(clippy::cast_precision_loss)]
        let min_throughput = self.config.min_throughput as f64;

        let mut state = self.state.lock();
        if state.history.len() >= self.config.history_len.max(1) {
            state.history.pop_front();
        }
        state.history.push_back(sample);

        let target = match current {
            StrategyKind::Locked => {
                let hot = sample.avg_wait >= high_water && sample.throughput >= min_throughput;
                state.hot_streak = if hot { state.hot_streak + 1 } else { 0 };
                (state.hot_streak >= self.config.consecutive_windows).then_some(StrategyKind::Sharded)
            }
            StrategyKind::Sharded => {
                let quiet = sample.avg_wait <= low_water || sample.throughput < min_throughput;
                state.quiet_streak = if quiet { state.quiet_streak + 1 } else { 0 };
                (state.quiet_streak >= self.config.consecutive_windows).then_some(StrategyKind::Locked)
            }
        };

        if target.is_some() {
            state.hot_streak = 0;
            state.quiet_streak = 0;
        }
        target
    }

    /// Close the current window on `queue`, evaluate it and perform any
    /// recommended switch. Returns the strategy switched to.
    pub fn sample_and_adapt(&self, queue: &TaskQueue) -> Option<StrategyKind> {
        let elapsed = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(state.window_started);
            state.window_started = now;
            elapsed
        };
        let current = queue.strategy();
        let sample = QueueStrategySample::from_window(queue.contention().take_window(), elapsed, current);
        debug!(
            strategy = %current,
            contended = sample.contention_count,
            throughput = sample.throughput,
            avg_wait_ns = u64::try_from(sample.avg_wait.as_nanos()).unwrap_or(u64::MAX),
            "Queue contention sample"
        );

        let target = self.evaluate(current, sample)?;
        queue.switch_strategy(target).map(|_| target)
    }

    /// Samples currently held, oldest first.
    #[must_use]
    pub fn recent_samples(&self) -> Vec<QueueStrategySample> {
        self.state.lock().history.iter().copied().collect()
    }
}
