//! Core scheduling abstractions: tasks, queue, workers and the components
//! that protect and observe them.

pub mod adaptive;
pub mod cancellation;
pub mod circuit_breaker;
pub mod error;
pub mod health;
pub mod log_sink;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod worker_pool;

pub use adaptive::{AdaptiveStrategySelector, QueueStrategySample};
pub use cancellation::CancellationToken;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use error::{AppResult, SchedulerError};
pub use health::{HealthCheckFn, HealthCheckResult, HealthEvaluator, HealthReport, HealthStatus};
pub use log_sink::{InMemoryLogSink, LogLevel, LogRecord, LogSink, TracingLogSink};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use queue::{
    ContentionWindow, PopResult, QueueContention, QueueStrategy, StrategyKind, StrategyPop,
    TaskQueue,
};
pub use scheduler::{RecurringId, RecurringScheduler};
pub use task::{PriorityTask, TaskHandle, TaskOutcome};
pub use worker_pool::{PoolStats, WorkerPool};
