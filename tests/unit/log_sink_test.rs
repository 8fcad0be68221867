//! Tests for the operational log sinks

use std::sync::Arc;
use std::thread;

use prometheus_task_engine::core::{InMemoryLogSink, LogLevel, LogSink, TracingLogSink};

#[test]
fn test_in_memory_sink_records_in_order() {
    let sink = InMemoryLogSink::new(8);
    sink.log(LogLevel::Info, "worker 0 started");
    sink.log(LogLevel::Warn, "task 3 failed");

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].level, LogLevel::Info);
    assert_eq!(records[1].message, "task 3 failed");
    assert!(sink.contains("task 3"));
    assert!(!sink.contains("task 4"));
}

#[test]
fn test_in_memory_sink_bounded() {
    let sink = InMemoryLogSink::new(3);
    for i in 0..10 {
        sink.log(LogLevel::Debug, &format!("message {i}"));
    }
    let messages: Vec<_> = sink.records().into_iter().map(|r| r.message).collect();
    assert_eq!(messages, vec!["message 7", "message 8", "message 9"]);
}

#[test]
fn test_sink_shared_across_threads() {
    let sink: Arc<InMemoryLogSink> = Arc::new(InMemoryLogSink::default());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                for i in 0..25 {
                    sink.log(LogLevel::Info, &format!("thread {t} line {i}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(sink.records().len(), 100);
}

#[test]
fn test_tracing_sink_accepts_all_levels() {
    let sink = TracingLogSink;
    for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
        sink.log(level, "level check");
    }
}

#[test]
fn test_level_display() {
    assert_eq!(LogLevel::Warn.to_string(), "warn");
    assert_eq!(serde_json::to_string(&LogLevel::Error).unwrap(), "\"error\"");
}
