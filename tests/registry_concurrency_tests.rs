//! Integration tests for concurrent region handle assignment
//!
//! # Test Coverage
//!
//! - Many threads racing on one unset slot observe one handle
//! - The descriptor is interned once and each backend hears about it once
//! - Distinct slots with the same descriptor collapse to one handle
//! - Resolution after publication never takes the slow path again
//! - Catalog warm-up followed by concurrent hot-path use

use hilo::backend::RecordingBackend;
use hilo::catalog::{RegionSite, RegionUnit};
use hilo::event::Construct;
use hilo::handle::HandleSlot;
use hilo::registry::Registry;
use hilo::tracker::Tracker;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 32;

fn times_announced(recorder: &RecordingBackend, descriptor: &str) -> usize {
    recorder.regions().iter().filter(|(_, d)| d == descriptor).count()
}

#[test]
fn test_racing_threads_agree_on_one_handle() {
    for _ in 0..20 {
        let registry = Registry::new();
        let slot = HandleSlot::new();
        let start = Barrier::new(THREADS);
        let descriptor_calls = AtomicUsize::new(0);

        let handles: HashSet<_> = thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        start.wait();
                        registry.resolve_with(&slot, || {
                            descriptor_calls.fetch_add(1, Ordering::Relaxed);
                            Some("kind=parallel*line=7*".into())
                        })
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(handles.len(), 1);
        assert_eq!(slot.get(), handles.into_iter().next());
        assert_eq!(registry.stats().slot_initializations, 1);
        assert_eq!(registry.len(), 1);
        // Only the winner reads the descriptor in release builds; debug builds
        // also read it on the fast path to check for slot reuse
        if !cfg!(debug_assertions) {
            assert_eq!(descriptor_calls.load(Ordering::Relaxed), 1);
        }
    }
}

#[test]
fn test_backend_hears_new_region_once_under_contention() {
    let recorder = Arc::new(RecordingBackend::new());
    let tracker = Tracker::new(Arc::clone(&recorder));
    let slot = HandleSlot::new();
    let start = Barrier::new(THREADS);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                start.wait();
                tracker.enter(Construct::Single, &slot, "single@io.c:31");
                tracker.exit(Construct::Single, &slot);
            });
        }
    });

    assert_eq!(times_announced(&recorder, "single@io.c:31"), 1);
    assert_eq!(recorder.events().len(), THREADS * 2);
}

#[test]
fn test_same_descriptor_in_many_slots_collapses() {
    let registry = Registry::new();
    let slots: Vec<HandleSlot> = (0..THREADS).map(|_| HandleSlot::new()).collect();
    let start = Barrier::new(THREADS);

    let handles: HashSet<_> = thread::scope(|s| {
        let workers: Vec<_> = slots
            .iter()
            .map(|slot| {
                let start = &start;
                let registry = &registry;
                s.spawn(move || {
                    start.wait();
                    registry.resolve(slot, "kind=for*line=42*")
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(handles.len(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.stats().slot_initializations, THREADS);
}

#[test]
fn test_distinct_descriptors_get_distinct_handles() {
    let registry = Registry::new();
    let slots: Vec<HandleSlot> = (0..THREADS).map(|_| HandleSlot::new()).collect();

    let handles: HashSet<_> = thread::scope(|s| {
        let workers: Vec<_> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let registry = &registry;
                s.spawn(move || registry.resolve(slot, &format!("kind=atomic*line={}*", i)))
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(handles.len(), THREADS);
    for (i, slot) in slots.iter().enumerate() {
        let handle = slot.get().unwrap();
        assert_eq!(
            registry.descriptor(handle).as_deref(),
            Some(format!("kind=atomic*line={}*", i).as_str())
        );
    }
}

#[test]
fn test_resolved_slot_stays_on_fast_path() {
    let registry = Registry::new();
    let slot = HandleSlot::new();
    let first = registry.resolve(&slot, "kind=barrier*line=3*");

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1_000 {
                    assert_eq!(registry.resolve(&slot, "kind=barrier*line=3*"), first);
                }
            });
        }
    });

    assert_eq!(registry.stats().slot_initializations, 1);
}

static WARM_PARALLEL: HandleSlot = HandleSlot::new();
static WARM_BARRIER: HandleSlot = HandleSlot::new();
static WARM_UNIT: RegionUnit = RegionUnit {
    name: "stencil.c",
    sites: &[
        RegionSite {
            slot: &WARM_PARALLEL,
            descriptor: "kind=parallel*line=12*",
        },
        RegionSite {
            slot: &WARM_BARRIER,
            descriptor: "kind=barrier*line=30*",
        },
    ],
};

#[test]
fn test_catalog_warm_up_then_hot_path() {
    let recorder = Arc::new(RecordingBackend::new());
    let tracker = Tracker::new(Arc::clone(&recorder));

    assert!(tracker.register_unit(&WARM_UNIT));
    assert!(!tracker.register_unit(&WARM_UNIT));
    assert_eq!(tracker.num_regions(), 2);
    tracker.init_regions();

    assert!(WARM_PARALLEL.is_resolved());
    assert!(WARM_BARRIER.is_resolved());
    let announced_after_warm_up = recorder.regions();
    assert_eq!(times_announced(&recorder, "kind=parallel*line=12*"), 1);
    assert_eq!(times_announced(&recorder, "kind=barrier*line=30*"), 1);

    let saved = tracker.fork(&WARM_PARALLEL, true, 4, "kind=parallel*line=12*");
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                tracker.parallel_begin(&WARM_PARALLEL);
                let old = tracker.barrier_enter(&WARM_BARRIER, "kind=barrier*line=30*");
                tracker.barrier_exit(&WARM_BARRIER, old);
                tracker.parallel_end(&WARM_PARALLEL);
            });
        }
    });
    tracker.join(&WARM_PARALLEL, saved);

    // Warm-up did all the registration work for this unit
    let announced = recorder.regions();
    assert_eq!(times_announced(&recorder, "kind=parallel*line=12*"), 1);
    assert_eq!(times_announced(&recorder, "kind=barrier*line=30*"), 1);
    assert!(announced.starts_with(&announced_after_warm_up));
}
