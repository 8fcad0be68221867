//! Tests for configuration validation and loading

use std::time::Duration;

use prometheus_task_engine::config::{AdaptiveConfig, CircuitBreakerConfig, EngineConfig};
use prometheus_task_engine::core::StrategyKind;

#[test]
fn test_default_config_is_valid() {
    let cfg = EngineConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_queue_capacity, 10_000);
    assert_eq!(cfg.initial_strategy, StrategyKind::Locked);
    assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
    assert_eq!(cfg.circuit_breaker.reset_timeout(), Duration::from_secs(30));
    assert!(cfg.adaptive.enabled);
}

#[test]
fn test_zero_capacity_rejected() {
    let cfg = EngineConfig::new().with_max_queue_capacity(0);
    assert!(cfg.validate().unwrap_err().contains("max_queue_capacity"));
}

#[test]
fn test_small_stack_rejected() {
    let cfg = EngineConfig::new().with_thread_stack_size(1024);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_degraded_utilization_bounds() {
    assert!(EngineConfig::new().with_degraded_utilization(0.0).validate().is_err());
    assert!(EngineConfig::new().with_degraded_utilization(1.5).validate().is_err());
    assert!(EngineConfig::new().with_degraded_utilization(1.0).validate().is_ok());
}

#[test]
fn test_breaker_thresholds_validated() {
    let zero_failures = CircuitBreakerConfig {
        failure_threshold: 0,
        ..CircuitBreakerConfig::default()
    };
    assert!(zero_failures.validate().is_err());

    let cfg = EngineConfig::new().with_success_threshold(0);
    assert!(cfg.validate().unwrap_err().contains("circuit_breaker"));
}

#[test]
fn test_adaptive_water_marks_validated() {
    let inverted = AdaptiveConfig {
        low_water_wait_ns: 50_000,
        high_water_wait_ns: 10_000,
        ..AdaptiveConfig::default()
    };
    assert!(inverted.validate().is_err());
    let cfg = EngineConfig::new().with_adaptive_config(inverted);
    assert!(cfg.validate().unwrap_err().contains("adaptive"));
}

#[test]
fn test_worker_count_resolution() {
    assert_eq!(EngineConfig::new().with_worker_count(6).resolved_worker_count(), 6);
    assert!(EngineConfig::new().resolved_worker_count() >= 1);
}

#[test]
fn test_from_json_partial() {
    let cfg = EngineConfig::from_json_str(
        r#"{
            "worker_count": 2,
            "initial_strategy": "sharded",
            "circuit_breaker": { "failure_threshold": 9 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.worker_count, 2);
    assert_eq!(cfg.initial_strategy, StrategyKind::Sharded);
    assert_eq!(cfg.circuit_breaker.failure_threshold, 9);
    assert_eq!(cfg.circuit_breaker.reset_timeout_ms, 30_000);
    assert_eq!(cfg.max_queue_capacity, 10_000);
}

#[test]
fn test_from_json_rejects_invalid() {
    assert!(EngineConfig::from_json_str("{ not json").unwrap_err().starts_with("parse error"));
    assert!(EngineConfig::from_json_str(r#"{ "max_queue_capacity": 0 }"#).is_err());
}

#[test]
fn test_env_overrides() {
    // Variables are unique to this test so parallel tests are unaffected.
    std::env::set_var("TASK_ENGINE_MAX_QUEUE_CAPACITY", "321");
    std::env::set_var("TASK_ENGINE_INITIAL_STRATEGY", "Sharded");
    std::env::set_var("TASK_ENGINE_ADAPTIVE", "false");

    let mut cfg = EngineConfig::default();
    cfg.apply_env_overrides().unwrap();
    assert_eq!(cfg.max_queue_capacity, 321);
    assert_eq!(cfg.initial_strategy, StrategyKind::Sharded);
    assert!(!cfg.adaptive.enabled);

    std::env::set_var("TASK_ENGINE_INITIAL_STRATEGY", "bogus");
    assert!(cfg.apply_env_overrides().unwrap_err().contains("INITIAL_STRATEGY"));

    std::env::remove_var("TASK_ENGINE_MAX_QUEUE_CAPACITY");
    std::env::remove_var("TASK_ENGINE_INITIAL_STRATEGY");
    std::env::remove_var("TASK_ENGINE_ADAPTIVE");
}
