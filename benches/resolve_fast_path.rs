//! Region handle and task context hot path benchmark
//!
//! Instrumented programs call the adapter on every construct boundary, so the
//! steady-state cost of a call is what matters. Once a slot is resolved the
//! hot path is:
//!
//! 1. `slot.get()` - a single acquire load
//! 2. Thread-local read/write of the current task
//! 3. `backend.report(event)` - a no-op with the null backend
//!
//! # Performance Targets
//!
//! - **Resolved slot lookup:** a few ns
//! - **Barrier enter/exit pair (null backend):** <50ns
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench resolve_fast_path
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hilo::backend::NullBackend;
use hilo::handle::HandleSlot;
use hilo::registry::Registry;
use hilo::tracker::Tracker;

/// Benchmark: Resolve an already-resolved slot
fn bench_resolved_slot(c: &mut Criterion) {
    let registry = Registry::new();
    let slot = HandleSlot::new();
    registry.resolve(&slot, "kind=for*line=1*");

    c.bench_function("resolve_resolved_slot", |b| {
        b.iter(|| black_box(registry.resolve(black_box(&slot), "kind=for*line=1*")));
    });
}

/// Benchmark: First resolution of fresh slots against a populated table
fn bench_slow_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_slow_path");

    for regions in [16usize, 256, 4096] {
        let registry = Registry::new();
        let descriptors: Vec<String> = (0..regions).map(|i| format!("kind=atomic*line={}*", i)).collect();
        for d in &descriptors {
            registry.resolve(&HandleSlot::new(), d);
        }

        group.bench_with_input(BenchmarkId::from_parameter(regions), &descriptors, |b, descriptors| {
            let mut i = 0usize;
            b.iter(|| {
                let slot = HandleSlot::new();
                black_box(registry.resolve(&slot, &descriptors[i % descriptors.len()]));
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark: Barrier enter/exit pair with a null backend
fn bench_scheduling_point(c: &mut Criterion) {
    let tracker = Tracker::new(NullBackend);
    let slot = HandleSlot::new();
    tracker.assign_handle(&slot, "kind=barrier*line=2*");

    c.bench_function("barrier_enter_exit", |b| {
        b.iter(|| {
            let saved = tracker.barrier_enter(black_box(&slot), "kind=barrier*line=2*");
            tracker.barrier_exit(&slot, saved);
        });
    });
}

/// Benchmark: Parallel begin/end on a team member
fn bench_parallel_begin_end(c: &mut Criterion) {
    let tracker = Tracker::new(NullBackend);
    let slot = HandleSlot::new();
    let saved = tracker.fork(&slot, true, 1, "kind=parallel*line=3*");

    c.bench_function("parallel_begin_end", |b| {
        b.iter(|| {
            black_box(tracker.parallel_begin(&slot));
            tracker.parallel_end(&slot);
        });
    });

    tracker.join(&slot, saved);
}

/// Benchmark: Task id allocation
fn bench_new_task_handle(c: &mut Criterion) {
    let tracker = Tracker::new(NullBackend);

    c.bench_function("new_task_handle", |b| {
        b.iter(|| black_box(tracker.new_task_handle()));
    });
}

criterion_group!(
    benches,
    bench_resolved_slot,
    bench_slow_path,
    bench_scheduling_point,
    bench_parallel_begin_end,
    bench_new_task_handle,
);
criterion_main!(benches);
