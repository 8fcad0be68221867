//! Tests for builder modules

use std::sync::Arc;

use prometheus_task_engine::builders::EngineBuilder;
use prometheus_task_engine::config::EngineConfig;
use prometheus_task_engine::core::{InMemoryLogSink, SchedulerError};

#[test]
fn test_builder_defaults() {
    let builder = EngineBuilder::default();
    assert_eq!(builder.config(), &EngineConfig::default());
}

#[test]
fn test_builder_overrides_worker_count() {
    let builder = EngineBuilder::new()
        .with_config(EngineConfig::new().with_max_queue_capacity(16))
        .with_worker_count(2);
    assert_eq!(builder.config().worker_count, 2);
    assert_eq!(builder.config().max_queue_capacity, 16);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = EngineBuilder::new()
        .with_config(EngineConfig::new().with_max_queue_capacity(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn test_builder_wires_sink_and_checks() {
    let sink = Arc::new(InMemoryLogSink::new(64));
    let engine = EngineBuilder::new()
        .with_worker_count(1)
        .with_log_sink(sink.clone())
        .with_health_check("cache", || true)
        .build()
        .unwrap();

    let report = engine.health();
    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].name, "cache");

    engine.shutdown(true);
    assert!(sink.contains("worker 0 started"));
    assert!(sink.contains("worker 0 stopped"));
}
