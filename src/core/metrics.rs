//! Task counters and latency percentiles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Immutable copy of the collector's state with derived percentiles.
///
/// Conservation: once the engine is idle,
/// `tasks_submitted == tasks_completed + tasks_failed + tasks_cancelled`.
/// `tasks_rejected` counts admission refusals, which were never submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks accepted into the queue.
    pub tasks_submitted: u64,
    /// Tasks whose payload returned a value.
    pub tasks_completed: u64,
    /// Tasks whose payload failed, panicked or was refused by an open circuit.
    pub tasks_failed: u64,
    /// Tasks cancelled before or during execution.
    pub tasks_cancelled: u64,
    /// Submissions refused at admission.
    pub tasks_rejected: u64,
    /// Latency samples currently held.
    pub latency_samples: usize,
    /// Median latency in microseconds.
    pub p50_latency_us: u64,
    /// 95th percentile latency in microseconds.
    pub p95_latency_us: u64,
    /// 99th percentile latency in microseconds.
    pub p99_latency_us: u64,
    /// Mean latency in microseconds.
    pub mean_latency_us: u64,
    /// Largest sampled latency in microseconds.
    pub max_latency_us: u64,
    /// Milliseconds since the collector was created.
    pub uptime_ms: u64,
    /// Wall-clock milliseconds since the Unix epoch.
    pub taken_at_ms: u128,
}

impl MetricsSnapshot {
    /// Tasks submitted but not yet terminal.
    #[must_use]
    pub const fn in_flight(&self) -> u64 {
        self.tasks_submitted
            .saturating_sub(self.tasks_completed + self.tasks_failed + self.tasks_cancelled)
    }

    /// Failed tasks as a fraction of terminal tasks.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let terminal = self.tasks_completed + self.tasks_failed + self.tasks_cancelled;
        if terminal == 0 {
            0.0
        } else {
            self.tasks_failed as f64 / terminal as f64
        }
    }
}

/// Shared counters updated by every worker.
///
/// Each counter is an independent atomic; only the latency ring has a lock.
#[derive(Debug)]
pub struct MetricsCollector {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
    sample_capacity: usize,
    started: Instant,
}

impl MetricsCollector {
    /// Create a collector keeping the newest `sample_capacity` latencies.
    #[must_use]
    pub fn new(sample_capacity: usize) -> Self {
        let sample_capacity = sample_capacity.max(1);
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(sample_capacity)),
            sample_capacity,
            started: Instant::now(),
        }
    }

    /// Count an accepted task.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed task and sample its latency.
    pub fn record_completed(&self, latency: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let mut ring = self.latencies.lock();
        if ring.len() >= self.sample_capacity {
            ring.pop_front();
        }
        ring.push_back(latency);
    }

    /// Count a failed task.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a cancelled task.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a refused submission.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters and compute percentiles over the latency ring.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut samples: Vec<Duration> = self.latencies.lock().iter().copied().collect();
        samples.sort_unstable();

        let total: Duration = samples.iter().sum();
        let mean = u32::try_from(samples.len())
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| total / n);

        MetricsSnapshot {
            tasks_submitted: self.submitted.load(Ordering::Relaxed),
            tasks_completed: self.completed.load(Ordering::Relaxed),
            tasks_failed: self.failed.load(Ordering::Relaxed),
            tasks_cancelled: self.cancelled.load(Ordering::Relaxed),
            tasks_rejected: self.rejected.load(Ordering::Relaxed),
            latency_samples: samples.len(),
            p50_latency_us: micros(percentile(&samples, 50)),
            p95_latency_us: micros(percentile(&samples, 95)),
            p99_latency_us: micros(percentile(&samples, 99)),
            mean_latency_us: micros(mean),
            max_latency_us: micros(samples.last().copied().unwrap_or_default()),
            uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            taken_at_ms: now_ms(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1_000)
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_percentiles_sort_then_index() {
        let metrics = MetricsCollector::new(1_000);
        for ms in (1..=100).rev() {
            metrics.record_completed(Duration::from_millis(ms));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.latency_samples, 100);
        assert_eq!(snap.p50_latency_us, 50_000);
        assert_eq!(snap.p95_latency_us, 95_000);
        assert_eq!(snap.p99_latency_us, 99_000);
        assert_eq!(snap.max_latency_us, 100_000);
        assert_eq!(snap.mean_latency_us, 50_500);
    }

    #[test]
    fn test_ring_keeps_newest() {
        let metrics = MetricsCollector::new(3);
        for ms in 1..=5 {
            metrics.record_completed(Duration::from_millis(ms));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.latency_samples, 3);
        assert_eq!(snap.p50_latency_us, 4_000);
        assert_eq!(snap.tasks_completed, 5);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = MetricsCollector::default().snapshot();
        assert_eq!(snap.p99_latency_us, 0);
        assert_eq!(snap.in_flight(), 0);
        assert!(snap.failure_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_counters() {
        let metrics = Arc::new(MetricsCollector::new(10));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record_submitted();
                        metrics.record_failed();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_submitted, 4_000);
        assert_eq!(snap.tasks_failed, 4_000);
        assert_eq!(snap.in_flight(), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsCollector::new(4);
        metrics.record_submitted();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"tasks_submitted\":1"));
    }
}
