//! Engine configuration: worker pool sizing, queue limits, breaker and
//! adaptive-strategy tuning.
//!
//! Configuration is consumed once at construction. Durations are stored as
//! integer milliseconds/nanoseconds so the struct round-trips cleanly through
//! JSON and environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::StrategyKind;

/// Environment variable prefix read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "TASK_ENGINE_";

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Successes in half-open state required to close the circuit.
    pub success_threshold: u32,
    /// Time the circuit stays open before admitting a trial task.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Reset timeout as a `Duration`.
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".into());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".into());
        }
        if self.reset_timeout_ms == 0 {
            return Err("reset_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Adaptive queue-strategy selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Whether the coordinator switches strategies automatically.
    pub enabled: bool,
    /// Length of one sampling window.
    pub sampling_interval_ms: u64,
    /// Average lock wait at or above which a window counts as contended.
    pub high_water_wait_ns: u64,
    /// Average lock wait at or below which a window counts as quiet.
    pub low_water_wait_ns: u64,
    /// Queue operations per second below which sharding is not worth it.
    pub min_throughput: u64,
    /// Consecutive windows required before switching.
    pub consecutive_windows: u32,
    /// Number of samples kept in the history ring.
    pub history_len: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_interval_ms: 100,
            high_water_wait_ns: 20_000,
            low_water_wait_ns: 2_000,
            min_throughput: 1_000,
            consecutive_windows: 3,
            history_len: 64,
        }
    }
}

impl AdaptiveConfig {
    /// Sampling window as a `Duration`.
    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.sampling_interval_ms == 0 {
            return Err("sampling_interval_ms must be greater than 0".into());
        }
        if self.low_water_wait_ns >= self.high_water_wait_ns {
            return Err("low_water_wait_ns must be below high_water_wait_ns".into());
        }
        if self.consecutive_windows == 0 {
            return Err("consecutive_windows must be greater than 0".into());
        }
        if self.history_len == 0 {
            return Err("history_len must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads; 0 detects the number of logical CPUs.
    pub worker_count: usize,
    /// Maximum queued tasks before `QueueFull`.
    pub max_queue_capacity: usize,
    /// Stack size for worker threads, in bytes.
    pub thread_stack_size: usize,
    /// Let idle workers pop from other shards under the sharded strategy.
    pub work_stealing: bool,
    /// Strategy active at startup.
    pub initial_strategy: StrategyKind,
    /// Latency samples retained for percentiles.
    pub latency_sample_capacity: usize,
    /// Queue utilization above which health reports `Degraded`.
    pub degraded_utilization: f64,
    /// Coordinator wake interval for recurring sweeps.
    pub scheduler_tick_ms: u64,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Adaptive strategy selection.
    pub adaptive: AdaptiveConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_queue_capacity: 10_000,
            thread_stack_size: 2 * 1024 * 1024,
            work_stealing: true,
            initial_strategy: StrategyKind::Locked,
            latency_sample_capacity: 1_000,
            degraded_utilization: 0.8,
            scheduler_tick_ms: 100,
            circuit_breaker: CircuitBreakerConfig::default(),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread count (0 = auto-detect).
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the maximum queue depth.
    #[must_use]
    pub const fn with_max_queue_capacity(mut self, capacity: usize) -> Self {
        self.max_queue_capacity = capacity;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Enable or disable work stealing.
    #[must_use]
    pub const fn with_work_stealing(mut self, enabled: bool) -> Self {
        self.work_stealing = enabled;
        self
    }

    /// Choose the startup queue strategy.
    #[must_use]
    pub const fn with_initial_strategy(mut self, kind: StrategyKind) -> Self {
        self.initial_strategy = kind;
        self
    }

    /// Set the latency ring size.
    #[must_use]
    pub const fn with_latency_sample_capacity(mut self, capacity: usize) -> Self {
        self.latency_sample_capacity = capacity;
        self
    }

    /// Set the degraded-health utilization threshold.
    #[must_use]
    pub fn with_degraded_utilization(mut self, threshold: f64) -> Self {
        self.degraded_utilization = threshold;
        self
    }

    /// Set the coordinator tick.
    #[must_use]
    pub const fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick_ms = duration_ms(tick);
        self
    }

    /// Set breaker failure threshold and reset timeout.
    #[must_use]
    pub const fn with_circuit_breaker(mut self, failure_threshold: u32, reset_timeout: Duration) -> Self {
        self.circuit_breaker.failure_threshold = failure_threshold;
        self.circuit_breaker.reset_timeout_ms = duration_ms(reset_timeout);
        self
    }

    /// Set the half-open success threshold.
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker.success_threshold = threshold;
        self
    }

    /// Enable or disable adaptive strategy switching.
    #[must_use]
    pub const fn with_adaptive(mut self, enabled: bool) -> Self {
        self.adaptive.enabled = enabled;
        self
    }

    /// Replace the adaptive tuning block.
    #[must_use]
    pub fn with_adaptive_config(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Worker count with 0 resolved to the number of logical CPUs.
    #[must_use]
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    /// Coordinator tick as a `Duration`.
    #[must_use]
    pub const fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_capacity == 0 {
            return Err("max_queue_capacity must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.latency_sample_capacity == 0 {
            return Err("latency_sample_capacity must be greater than 0".into());
        }
        if !(self.degraded_utilization > 0.0 && self.degraded_utilization <= 1.0) {
            return Err("degraded_utilization must be in (0, 1]".into());
        }
        if self.scheduler_tick_ms == 0 {
            return Err("scheduler_tick_ms must be greater than 0".into());
        }
        self.circuit_breaker
            .validate()
            .map_err(|e| format!("circuit_breaker invalid: {e}"))?;
        self.adaptive
            .validate()
            .map_err(|e| format!("adaptive invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a `.env` file if present, then apply `TASK_ENGINE_*` overrides
    /// on top of the defaults and validate.
    ///
    /// # Errors
    ///
    /// Returns a message naming an unparsable variable or invalid field.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overwrite fields from `TASK_ENGINE_*` variables that are set.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first unparsable variable.
    pub fn apply_env_overrides(&mut self) -> Result<(), String> {
        override_from_env("WORKER_COUNT", &mut self.worker_count)?;
        override_from_env("MAX_QUEUE_CAPACITY", &mut self.max_queue_capacity)?;
        override_from_env("THREAD_STACK_SIZE", &mut self.thread_stack_size)?;
        override_bool_from_env("WORK_STEALING", &mut self.work_stealing);
        override_from_env("LATENCY_SAMPLE_CAPACITY", &mut self.latency_sample_capacity)?;
        override_from_env("DEGRADED_UTILIZATION", &mut self.degraded_utilization)?;
        override_from_env("SCHEDULER_TICK_MS", &mut self.scheduler_tick_ms)?;
        override_from_env("FAILURE_THRESHOLD", &mut self.circuit_breaker.failure_threshold)?;
        override_from_env("SUCCESS_THRESHOLD", &mut self.circuit_breaker.success_threshold)?;
        override_from_env("RESET_TIMEOUT_MS", &mut self.circuit_breaker.reset_timeout_ms)?;
        override_bool_from_env("ADAPTIVE", &mut self.adaptive.enabled);

        if let Ok(val) = env::var(format!("{ENV_PREFIX}INITIAL_STRATEGY")) {
            self.initial_strategy = match val.to_lowercase().as_str() {
                "locked" => StrategyKind::Locked,
                "sharded" => StrategyKind::Sharded,
                other => return Err(format!("{ENV_PREFIX}INITIAL_STRATEGY: unknown strategy `{other}`")),
            };
        }
        Ok(())
    }
}

fn override_from_env<T>(name: &str, slot: &mut T) -> Result<(), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(val) = env::var(format!("{ENV_PREFIX}{name}")) {
        *slot = val
            .trim()
            .parse()
            .map_err(|e| format!("{ENV_PREFIX}{name}: {e}"))?;
    }
    Ok(())
}

fn override_bool_from_env(name: &str, slot: &mut bool) {
    if let Ok(val) = env::var(format!("{ENV_PREFIX}{name}")) {
        *slot = val.eq_ignore_ascii_case("true") || val == "1";
    }
}

const fn duration_ms(duration: Duration) -> u64 {
    let ms = duration.as_millis();
    if ms > u64::MAX as u128 {
        u64::MAX
    } else {
        ms as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.circuit_breaker.success_threshold, 1);
        assert!(cfg.resolved_worker_count() >= 1);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = EngineConfig::new()
            .with_worker_count(3)
            .with_circuit_breaker(3, Duration::from_millis(250))
            .with_scheduler_tick(Duration::from_millis(20));
        assert_eq!(cfg.resolved_worker_count(), 3);
        assert_eq!(cfg.circuit_breaker.reset_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.scheduler_tick(), Duration::from_millis(20));
    }

    #[test]
    fn test_water_marks_must_be_ordered() {
        let mut cfg = EngineConfig::default();
        cfg.adaptive.low_water_wait_ns = cfg.adaptive.high_water_wait_ns;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("adaptive invalid"));
    }
}
