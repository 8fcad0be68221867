//! Benchmarks for the task engine.
//!
//! Benchmarks cover:
//! - Queue push/pop under each backing strategy
//! - Concurrent producers against each strategy
//! - Live strategy switching with a populated queue
//! - End-to-end submission through the engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use prometheus_task_engine::config::EngineConfig;
use prometheus_task_engine::core::{PriorityTask, StrategyKind, TaskQueue};
use prometheus_task_engine::runtime::TaskEngine;
use prometheus_task_engine::util::{init_tracing, Priority};

const STRATEGIES: [StrategyKind; 2] = [StrategyKind::Locked, StrategyKind::Sharded];

fn task(id: u64) -> PriorityTask {
    #[allow(clippy::cast_possible_truncation)]
    let priority = Priority::new((id % 128) as u8);
    PriorityTask::from_fn(id, priority, Instant::now(), || {})
}

// ============================================================================
// Single-threaded Queue Operations
// ============================================================================

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        for kind in STRATEGIES {
            group.bench_with_input(BenchmarkId::new(kind.to_string(), size), &size, |b, &size| {
                b.iter(|| {
                    let queue = TaskQueue::new(kind, 20_000, 4, true);
                    for id in 0..size {
                        queue.push(task(id)).unwrap();
                    }
                    while let Some(t) = queue.try_pop(0) {
                        black_box(t.id());
                    }
                });
            });
        }
    }

    group.finish();
}

// ============================================================================
// Concurrent Producers
// ============================================================================

fn bench_concurrent_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_concurrent_push");
    let producers = 4u64;
    let per_producer = 2_500u64;
    group.throughput(Throughput::Elements(producers * per_producer));

    for kind in STRATEGIES {
        group.bench_function(kind.to_string(), |b| {
            b.iter(|| {
                let queue = Arc::new(TaskQueue::new(kind, 20_000, 4, true));
                let handles: Vec<_> = (0..producers)
                    .map(|p| {
                        let queue = Arc::clone(&queue);
                        thread::spawn(move || {
                            for i in 0..per_producer {
                                queue.push(task(p * per_producer + i)).unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(queue.size());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Strategy Switch
// ============================================================================

fn bench_strategy_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_strategy_switch");

    for size in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let queue = TaskQueue::new(StrategyKind::Locked, 20_000, 4, true);
            for id in 0..size {
                queue.push(task(id)).unwrap();
            }
            b.iter(|| {
                let next = match queue.strategy() {
                    StrategyKind::Locked => StrategyKind::Sharded,
                    StrategyKind::Sharded => StrategyKind::Locked,
                };
                black_box(queue.switch_strategy(next));
            });
        });
    }

    group.finish();
}

// ============================================================================
// End-to-End Engine
// ============================================================================

fn bench_engine_submit(c: &mut Criterion) {
    init_tracing();
    let mut group = c.benchmark_group("engine_submit_and_drain");
    let batch = 1_000u64;
    group.throughput(Throughput::Elements(batch));
    group.measurement_time(Duration::from_secs(5));

    for kind in STRATEGIES {
        let engine = TaskEngine::new(
            EngineConfig::new()
                .with_worker_count(4)
                .with_initial_strategy(kind)
                .with_adaptive(false),
        )
        .unwrap();

        group.bench_function(kind.to_string(), |b| {
            b.iter(|| {
                for i in 0..batch {
                    engine.submit(move || Ok(black_box(i) * 2)).unwrap();
                }
                engine.wait_for_completion(Some(Duration::from_secs(30)));
            });
        });

        engine.shutdown(true);
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop,
    bench_concurrent_push,
    bench_strategy_switch,
    bench_engine_submit
);
criterion_main!(benches);
