//! Hilo - POMP2 runtime adapter for instrumented OpenMP programs
//!
//! A source-to-source instrumenter wraps every OpenMP construct with POMP2
//! calls. This library is what those calls land in: it assigns each construct
//! site a process-wide region handle exactly once, tracks which logical task
//! every worker thread is running across parallel regions, scheduling points
//! and deferred tasks, and forwards each boundary to a measurement backend.
//!
//! ```
//! use hilo::backend::RecordingBackend;
//! use hilo::handle::HandleSlot;
//! use hilo::tracker::Tracker;
//! use std::sync::Arc;
//!
//! static REGION: HandleSlot = HandleSlot::new();
//!
//! let recorder = Arc::new(RecordingBackend::new());
//! let tracker = Tracker::new(Arc::clone(&recorder));
//!
//! let saved = tracker.fork(&REGION, true, 1, "parallel@main.c:10");
//! tracker.parallel_begin(&REGION);
//! tracker.parallel_end(&REGION);
//! tracker.join(&REGION, saved);
//!
//! assert_eq!(recorder.events().len(), 4);
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
#[cfg(feature = "pomp2")]
pub mod ffi;
pub mod handle;
pub mod registry;
pub mod task;
pub mod tracker;

/// Adapter version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
