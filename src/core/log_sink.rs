//! Pluggable sink for lifecycle events.
//!
//! Engine components report worker start/stop, breaker transitions, strategy
//! switches and recurring-task failures through a [`LogSink`]. The default
//! forwards to `tracing`; the in-memory sink keeps a bounded buffer for tests
//! and diagnostics.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Severity of a sink record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal lifecycle events.
    Info,
    /// Degraded but recoverable conditions.
    Warn,
    /// Failures.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Destination for engine lifecycle messages.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, level: LogLevel, message: &str);
}

/// Sink that forwards to the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "task_engine", "{message}"),
            LogLevel::Info => tracing::info!(target: "task_engine", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "task_engine", "{message}"),
            LogLevel::Error => tracing::error!(target: "task_engine", "{message}"),
        }
    }
}

/// One buffered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Wall-clock milliseconds since the Unix epoch.
    pub logged_at_ms: u128,
}

/// Bounded in-memory sink. The oldest record is evicted once full.
#[derive(Debug)]
pub struct InMemoryLogSink {
    records: Mutex<VecDeque<LogRecord>>,
    max_records: usize,
}

impl InMemoryLogSink {
    /// Create a sink holding at most `max_records` entries.
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
        }
    }

    /// Snapshot of stored records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Whether any stored message contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.message.contains(needle))
    }
}

impl Default for InMemoryLogSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LogSink for InMemoryLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        let mut records = self.records.lock();
        if records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(LogRecord {
            level,
            message: message.to_string(),
            logged_at_ms: now_ms(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_evicts_oldest() {
        let sink = InMemoryLogSink::new(2);
        sink.log(LogLevel::Info, "first");
        sink.log(LogLevel::Warn, "second");
        sink.log(LogLevel::Error, "third");

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "second");
        assert_eq!(records[1].level, LogLevel::Error);
        assert!(!sink.contains("first"));
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
