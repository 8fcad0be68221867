//! Overall health verdict from queue load, breaker state and registered
//! checks.
//!
//! Checks run synchronously on every [`HealthEvaluator::evaluate`] call, so
//! a slow check delays the report. Callers that need a bounded answer must
//! apply their own timeout around the query.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{CircuitBreaker, CircuitState, TaskQueue};
use crate::util::clock::now_ms;

/// Boxed health-check callback.
pub type HealthCheckFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything nominal.
    Healthy,
    /// Queue utilization above the configured threshold.
    Degraded,
    /// Circuit open or a registered check failed.
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Result of one registered check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Name given at registration.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Set when the check panicked.
    pub error: Option<String>,
}

/// Health report returned by [`HealthEvaluator::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Queue depth as a fraction of capacity.
    pub queue_utilization: f64,
    /// Breaker state at evaluation time.
    pub circuit_state: CircuitState,
    /// Per-check results in registration order.
    pub checks: Vec<HealthCheckResult>,
    /// Wall-clock milliseconds since the Unix epoch.
    pub checked_at_ms: u128,
}

impl HealthReport {
    /// Whether the verdict is `Healthy`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Combines queue utilization, breaker state and pluggable checks.
pub struct HealthEvaluator {
    queue: Arc<TaskQueue>,
    breaker: Arc<CircuitBreaker>,
    checks: RwLock<Vec<(String, HealthCheckFn)>>,
    degraded_utilization: f64,
}

impl HealthEvaluator {
    /// Create an evaluator reporting `Degraded` above `degraded_utilization`.
    #[must_use]
    pub fn new(
        queue: Arc<TaskQueue>,
        breaker: Arc<CircuitBreaker>,
        degraded_utilization: f64,
    ) -> Self {
        Self {
            queue,
            breaker,
            checks: RwLock::new(Vec::new()),
            degraded_utilization,
        }
    }

    /// Register a named check. A check with the same name is replaced.
    pub fn register_health_check<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let mut checks = self.checks.write();
        if let Some(slot) = checks.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = Box::new(check);
        } else {
            checks.push((name, Box::new(check)));
        }
    }

    /// Remove a check. Returns `false` if no check had that name.
    pub fn unregister_health_check(&self, name: &str) -> bool {
        let mut checks = self.checks.write();
        let before = checks.len();
        checks.retain(|(existing, _)| existing != name);
        checks.len() != before
    }

    /// Names of registered checks.
    #[must_use]
    pub fn check_names(&self) -> Vec<String> {
        self.checks.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Run every check and compute the verdict.
    #[must_use]
    pub fn evaluate(&self) -> HealthReport {
        let results: Vec<HealthCheckResult> = self
            .checks
            .read()
            .iter()
            .map(|(name, check)| run_check(name, check))
            .collect();

        let queue_utilization = self.queue.utilization();
        let circuit_state = self.breaker.state();

        let status = if circuit_state == CircuitState::Open || results.iter().any(|r| !r.passed) {
            HealthStatus::Critical
        } else if queue_utilization > self.degraded_utilization {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            queue_utilization,
            circuit_state,
            checks: results,
            checked_at_ms: now_ms(),
        }
    }
}

fn run_check(name: &str, check: &HealthCheckFn) -> HealthCheckResult {
    match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(passed) => HealthCheckResult {
            name: name.to_string(),
            passed,
            error: None,
        },
        Err(_) => {
            warn!(check = name, "Health check panicked");
            HealthCheckResult {
                name: name.to_string(),
                passed: false,
                error: Some("health check panicked".into()),
            }
        }
    }
}

impl fmt::Debug for HealthEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthEvaluator")
            .field("checks", &self.check_names())
            .field("degraded_utilization", &self.degraded_utilization)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::core::{PriorityTask, StrategyKind};
    use crate::util::types::Priority;
    use std::time::Instant;

    fn evaluator(capacity: usize) -> (Arc<TaskQueue>, Arc<CircuitBreaker>, HealthEvaluator) {
        let queue = Arc::new(TaskQueue::new(StrategyKind::Locked, capacity, 1, false));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout_ms: 60_000,
        }));
        let health = HealthEvaluator::new(Arc::clone(&queue), Arc::clone(&breaker), 0.8);
        (queue, breaker, health)
    }

    #[test]
    fn test_healthy_by_default() {
        let (_, _, health) = evaluator(10);
        let report = health.evaluate();
        assert!(report.is_healthy());
        assert!(report.checks.is_empty());
    }

    #[test]
    fn test_degraded_above_threshold() {
        let (queue, _, health) = evaluator(10);
        for id in 0..9 {
            queue
                .push(PriorityTask::from_fn(id, Priority::LOW, Instant::now(), || {}))
                .unwrap();
        }
        assert_eq!(health.evaluate().status, HealthStatus::Degraded);
    }

    #[test]
    fn test_open_circuit_is_critical() {
        let (_, breaker, health) = evaluator(10);
        breaker.on_failure();
        let report = health.evaluate();
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.circuit_state, CircuitState::Open);
    }

    #[test]
    fn test_failing_and_panicking_checks() {
        let (_, _, health) = evaluator(10);
        health.register_health_check("disk", || true);
        health.register_health_check("database", || false);
        assert_eq!(health.evaluate().status, HealthStatus::Critical);

        assert!(health.unregister_health_check("database"));
        assert!(!health.unregister_health_check("database"));
        assert!(health.evaluate().is_healthy());

        health.register_health_check("flaky", || panic!("check crashed"));
        let report = health.evaluate();
        assert_eq!(report.status, HealthStatus::Critical);
        let flaky = report.checks.iter().find(|c| c.name == "flaky").unwrap();
        assert!(!flaky.passed);
        assert!(flaky.error.is_some());
    }
}
