//! The `TaskEngine` facade: one object owning the worker pool, recurring
//! registry, adaptive selector, health evaluator and coordinator thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::builders::EngineBuilder;
use crate::config::EngineConfig;
use crate::core::{
    AdaptiveStrategySelector, AppResult, CancellationToken, CircuitBreakerStats, HealthEvaluator,
    HealthReport, LogSink, MetricsSnapshot, PoolStats, QueueStrategySample, RecurringId,
    RecurringScheduler, SchedulerError, StrategyKind, TaskHandle, WorkerPool,
};
use crate::util::clock::instant_after;
use crate::util::types::Priority;

use super::coordinator::{Coordinator, CoordinatorContext};

/// Task scheduling engine.
///
/// Construct with [`TaskEngine::builder`] or [`TaskEngine::new`]. Every
/// submission method returns synchronously with either a [`TaskHandle`] or
/// an admission error (`SystemShuttingDown`, `CircuitOpen`, `QueueFull`).
pub struct TaskEngine {
    config: EngineConfig,
    pool: Arc<WorkerPool>,
    scheduler: Arc<RecurringScheduler>,
    selector: Arc<AdaptiveStrategySelector>,
    health: HealthEvaluator,
    coordinator: Coordinator,
}

impl TaskEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Start an engine with `config` and the default `tracing` sink.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if validation fails
    /// - `SchedulerError::Internal` if a thread cannot be spawned
    pub fn new(config: EngineConfig) -> Result<Self, SchedulerError> {
        EngineBuilder::new().with_config(config).build()
    }

    pub(crate) fn start(config: EngineConfig, sink: Arc<dyn LogSink>) -> Result<Self, SchedulerError> {
        let pool = Arc::new(WorkerPool::with_sink(&config, sink)?);
        let scheduler = Arc::new(RecurringScheduler::new());
        let selector = Arc::new(AdaptiveStrategySelector::new(config.adaptive.clone()));
        let health = HealthEvaluator::new(
            Arc::clone(pool.queue()),
            Arc::clone(pool.breaker()),
            config.degraded_utilization,
        );

        let coordinator = Coordinator::start(CoordinatorContext {
            pool: Arc::clone(&pool),
            scheduler: Arc::clone(&scheduler),
            selector: Arc::clone(&selector),
            tick: config.scheduler_tick(),
            adaptive: config.adaptive.enabled,
        })
        .map_err(|e| {
            pool.shutdown(false);
            SchedulerError::Internal(format!("failed to spawn coordinator: {e}"))
        })?;

        info!(
            workers = pool.worker_count(),
            adaptive = config.adaptive.enabled,
            "Task engine started"
        );

        Ok(Self {
            config,
            pool,
            scheduler,
            selector,
            health,
            coordinator,
        })
    }

    /// Submit at normal priority.
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(Priority::NORMAL, task)
    }

    /// Submit at `priority`.
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn submit_with_priority<F, T>(
        &self,
        priority: Priority,
        task: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(priority, task)
    }

    /// Submit at [`Priority::CRITICAL`].
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn submit_critical<F, T>(&self, task: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(Priority::CRITICAL, task)
    }

    /// Submit at [`Priority::BACKGROUND`].
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn submit_background<F, T>(&self, task: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(Priority::BACKGROUND, task)
    }

    /// Submit with a cancellation token checked before execution and passed
    /// to the payload.
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn submit_cancellable<F, T>(
        &self,
        token: CancellationToken,
        priority: Priority,
        task: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce(&CancellationToken) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit_cancellable(token, priority, task)
    }

    /// Run `task` once, no earlier than `delay` from now, at normal priority.
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn schedule<F, T>(&self, delay: Duration, task: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule_with_priority(delay, Priority::NORMAL, task)
    }

    /// Run `task` once, no earlier than `delay` from now, at `priority`.
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown`, `CircuitOpen` or `QueueFull`.
    pub fn schedule_with_priority<F, T>(
        &self,
        delay: Duration,
        priority: Priority,
        task: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit_at(priority, instant_after(delay), task)
    }

    /// Run `task` every `interval` at normal priority until cancelled.
    ///
    /// # Errors
    ///
    /// `SystemShuttingDown` after shutdown, `InvalidConfig` for a zero
    /// interval.
    pub fn schedule_recurring<F>(&self, interval: Duration, task: F) -> Result<RecurringId, SchedulerError>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        self.schedule_recurring_with_priority(interval, Priority::NORMAL, task)
    }

    /// Run `task` every `interval` at `priority` until cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`schedule_recurring`](Self::schedule_recurring).
    pub fn schedule_recurring_with_priority<F>(
        &self,
        interval: Duration,
        priority: Priority,
        task: F,
    ) -> Result<RecurringId, SchedulerError>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        if !self.pool.is_accepting() {
            return Err(SchedulerError::SystemShuttingDown);
        }
        self.scheduler.schedule_recurring(interval, priority, task)
    }

    /// Stop a recurring task. Occurrences already submitted still run.
    pub fn cancel_recurring(&self, id: RecurringId) -> bool {
        self.scheduler.cancel_recurring(id)
    }

    /// Block until no task is queued or executing. Returns `false` on
    /// timeout.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.pool.wait_for_completion(timeout)
    }

    /// Stop the coordinator, then shut the pool down. Idempotent.
    pub fn shutdown(&self, graceful: bool) {
        self.coordinator.stop();
        self.scheduler.clear();
        self.pool.shutdown(graceful);
    }

    /// Counter and latency snapshot.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.pool.metrics().snapshot()
    }

    /// Register a named health check. A check with the same name is replaced.
    pub fn register_health_check<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.health.register_health_check(name, check);
    }

    /// Remove a health check.
    pub fn unregister_health_check(&self, name: &str) -> bool {
        self.health.unregister_health_check(name)
    }

    /// Run every health check and compute the verdict.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        self.health.evaluate()
    }

    /// Pool utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Circuit breaker statistics.
    #[must_use]
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.pool.breaker().stats()
    }

    /// Switch the queue strategy by hand. Returns the number of tasks moved,
    /// or `None` if `kind` is already active.
    pub fn switch_strategy(&self, kind: StrategyKind) -> Option<usize> {
        self.pool.queue().switch_strategy(kind)
    }

    /// Active queue strategy.
    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        self.pool.queue().strategy()
    }

    /// Recent adaptive-selector samples, oldest first.
    #[must_use]
    pub fn strategy_samples(&self) -> Vec<QueueStrategySample> {
        self.selector.recent_samples()
    }

    /// Live recurring entries.
    #[must_use]
    pub fn recurring_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying worker pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

#[cfg(feature = "tokio-runtime")]
impl TaskEngine {
    /// Wait for completion from async code on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Internal` if the blocking wait panicked.
    pub async fn wait_for_completion_async(&self, timeout: Duration) -> Result<bool, SchedulerError> {
        let pool = Arc::clone(&self.pool);
        let deadline = Instant::now().checked_add(timeout);
        tokio::task::spawn_blocking(move || {
            pool.wait_for_completion(deadline.map(|d| d.saturating_duration_since(Instant::now())))
        })
        .await
        .map_err(|e| SchedulerError::Internal(format!("blocking wait failed: {e}")))
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        // Releases the coordinator's pool reference; the pool itself only
        // signals its workers when dropped.
        self.coordinator.stop();
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("pool", &self.pool)
            .field("recurring", &self.scheduler.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TaskEngine {
        TaskEngine::new(
            EngineConfig::new()
                .with_worker_count(2)
                .with_scheduler_tick(Duration::from_millis(10)),
        )
        .unwrap()
    }

    #[test]
    fn test_priority_sugar() {
        let engine = engine();
        let critical = engine.submit_critical(|| Ok("critical")).unwrap();
        let background = engine.submit_background(|| Ok("background")).unwrap();
        assert_eq!(critical.get(Some(Duration::from_secs(5))).unwrap(), "critical");
        assert_eq!(background.get(Some(Duration::from_secs(5))).unwrap(), "background");
        engine.shutdown(true);
    }

    #[test]
    fn test_schedule_waits_for_delay() {
        let engine = engine();
        let started = Instant::now();
        let handle = engine
            .schedule(Duration::from_millis(50), move || Ok(started.elapsed()))
            .unwrap();
        let elapsed = handle.get(Some(Duration::from_secs(5))).unwrap();
        assert!(elapsed >= Duration::from_millis(50));
        engine.shutdown(true);
    }

    #[test]
    fn test_recurring_rejected_after_shutdown() {
        let engine = engine();
        engine.shutdown(true);
        assert!(matches!(
            engine.schedule_recurring(Duration::from_millis(10), || Ok(())),
            Err(SchedulerError::SystemShuttingDown)
        ));
    }

    #[test]
    fn test_manual_strategy_switch() {
        let engine = engine();
        assert_eq!(engine.strategy(), StrategyKind::Locked);
        assert_eq!(engine.switch_strategy(StrategyKind::Sharded), Some(0));
        assert_eq!(engine.stats().strategy, StrategyKind::Sharded);
        engine.shutdown(true);
    }
}
