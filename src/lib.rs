//! # Prometheus Task Engine
//!
//! An in-process task-scheduling core: a fixed pool of worker threads that
//! runs prioritized closures, supports delayed and recurring execution and
//! cooperative cancellation, and protects itself with a circuit breaker while
//! exposing metrics and health.
//!
//! ## Core Problem Solved
//!
//! Applications that mix latency-sensitive and background work on one
//! machine need a single scheduler that:
//!
//! - **Orders by urgency**: higher-priority ready tasks run first
//! - **Adapts to contention**: the queue switches between a single-lock heap
//!   and per-worker shards while it runs, without losing or duplicating tasks
//! - **Isolates failure**: a run of failing tasks opens a circuit breaker and
//!   further submissions fail fast until the reset timeout
//! - **Never loses a task silently**: every accepted task ends `Completed`,
//!   `Failed` or `Cancelled`, and the outcome is counted even if nobody waits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use prometheus_task_engine::config::EngineConfig;
//! use prometheus_task_engine::runtime::TaskEngine;
//!
//! let engine = TaskEngine::builder()
//!     .with_config(EngineConfig::new().with_worker_count(4))
//!     .with_health_check("always", || true)
//!     .build()?;
//!
//! let handle = engine.submit_critical(|| Ok(2 + 2))?;
//! assert_eq!(handle.get(Some(Duration::from_secs(1)))?, 4);
//!
//! let heartbeat = engine.schedule_recurring(Duration::from_secs(1), || Ok(()))?;
//! engine.cancel_recurring(heartbeat);
//!
//! engine.wait_for_completion(Some(Duration::from_secs(5)));
//! println!("{:?}", engine.metrics_snapshot());
//! engine.shutdown(true);
//! # Ok::<(), prometheus_task_engine::core::SchedulerError>(())
//! ```
//!
//! ## Layout
//!
//! - [`core`]: tasks, the task queue, worker pool, circuit breaker, metrics,
//!   health, recurring registry and adaptive selector
//! - [`infra`]: the two queue backing strategies
//! - [`config`] / [`builders`]: configuration and engine construction
//! - [`runtime`]: the [`TaskEngine`](runtime::TaskEngine) facade and its
//!   coordinator thread
//! - [`util`]: priorities, clock helpers and `tracing` setup

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions.
pub mod core;
/// Engine configuration.
pub mod config;
/// Builders to construct engines from configuration.
pub mod builders;
/// Queue backing strategies.
pub mod infra;
/// Engine facade and coordinator thread.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::builders::EngineBuilder;
pub use crate::config::EngineConfig;
pub use crate::core::{
    CancellationToken, HealthStatus, MetricsSnapshot, SchedulerError, StrategyKind, TaskHandle,
    TaskOutcome,
};
pub use crate::runtime::TaskEngine;
pub use crate::util::types::Priority;
