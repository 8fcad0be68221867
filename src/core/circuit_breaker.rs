//! Failure isolation for the worker pool.
//!
//! States move `Closed -> Open` after `failure_threshold` consecutive
//! failures, `Open -> HalfOpen` lazily on the first admission or execution
//! check after `reset_timeout`, `HalfOpen -> Closed` after
//! `success_threshold` successes and `HalfOpen -> Open` on any failure.
//! There is no timer thread.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::core::{LogLevel, LogSink, SchedulerError, TracingLogSink};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting work until the reset timeout elapses.
    Open,
    /// Admitting trial work after the timeout.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// State at the time of the snapshot.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes recorded in the current half-open period.
    pub half_open_successes: u32,
    /// Times the circuit has opened.
    pub times_opened: u64,
    /// Admission or execution checks refused while open.
    pub rejections: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    times_opened: u64,
    rejections: u64,
}

impl BreakerInner {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            success_count: 0,
            opened_at: None,
            times_opened: 0,
            rejections: 0,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.success_count = 0;
        self.times_opened += 1;
    }

    /// Remaining open time, or `None` once the timeout has elapsed.
    fn remaining(&self, now: Instant, reset_timeout: Duration) -> Option<Duration> {
        let opened_at = self.opened_at?;
        reset_timeout.checked_sub(now.saturating_duration_since(opened_at)).filter(|d| !d.is_zero())
    }
}

/// Three-state circuit breaker guarded by one mutex.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    sink: Arc<dyn LogSink>,
}

impl CircuitBreaker {
    /// Create a closed breaker reporting transitions to `tracing` only.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingLogSink))
    }

    /// Create a closed breaker reporting transitions to `sink`.
    #[must_use]
    pub fn with_sink(config: CircuitBreakerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
            sink,
        }
    }

    /// Admission/execution check.
    ///
    /// Performs the lazy `Open -> HalfOpen` transition when the reset timeout
    /// has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::CircuitOpen` with the remaining open time
    /// while the circuit is open.
    pub fn try_acquire(&self) -> Result<(), SchedulerError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        if let Some(retry_after) = inner.remaining(now, self.config.reset_timeout()) {
            inner.rejections += 1;
            return Err(SchedulerError::CircuitOpen { retry_after });
        }
        inner.state = CircuitState::HalfOpen;
        inner.success_count = 0;
        drop(inner);
        self.report(CircuitState::Open, CircuitState::HalfOpen);
        Ok(())
    }

    /// Record a successful task.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::HalfOpen {
            return;
        }
        inner.success_count += 1;
        if inner.success_count >= self.config.success_threshold {
            inner.state = CircuitState::Closed;
            inner.success_count = 0;
            inner.opened_at = None;
            drop(inner);
            self.report(CircuitState::HalfOpen, CircuitState::Closed);
        }
    }

    /// Record a failed task.
    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let from = inner.state;
        let opens = match from {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if opens {
            inner.open(now);
            let failures = inner.consecutive_failures;
            drop(inner);
            warn!(failures = failures, from = %from, "Circuit breaker opened");
            self.report(from, CircuitState::Open);
        }
    }

    /// Current state without performing the lazy transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether the breaker is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.success_count,
            times_opened: inner.times_opened,
            rejections: inner.rejections,
        }
    }

    /// Force the breaker closed and clear failure counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        drop(inner);
        if from != CircuitState::Closed {
            self.report(from, CircuitState::Closed);
        }
    }

    /// Breaker configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn report(&self, from: CircuitState, to: CircuitState) {
        info!(from = %from, to = %to, "Circuit breaker transition");
        let level = if to == CircuitState::Open {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        self.sink
            .log(level, &format!("circuit breaker {from} -> {to}"));
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
