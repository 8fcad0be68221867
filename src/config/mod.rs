//! Configuration models for the engine, circuit breaker and adaptive queue.

pub mod engine;

pub use engine::{AdaptiveConfig, CircuitBreakerConfig, EngineConfig, ENV_PREFIX};
