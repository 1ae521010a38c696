//! Measurement backends
//!
//! The adapter never stores or aggregates events itself; it hands each one to
//! a [`Backend`]. Reporting is fire-and-forget: a backend that fails to record
//! an event deals with it on its own error channel, because replaying a stale
//! or duplicate event would corrupt the trace.

use crate::event::Event;
use crate::handle::RegionHandle;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Receiver of region metadata and boundary events
///
/// Called concurrently from every worker thread, never with an adapter lock
/// held, so an implementation may block.
pub trait Backend: Send + Sync {
    /// A region handle and its descriptor, announced once per handle in
    /// handle order, before any event that carries the handle.
    fn region_registered(&self, handle: RegionHandle, descriptor: &str) {
        let _ = (handle, descriptor);
    }

    /// A construct boundary was crossed.
    fn report(&self, event: &Event);

    /// Push buffered output to its destination.
    fn flush(&self) {}
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn region_registered(&self, handle: RegionHandle, descriptor: &str) {
        (**self).region_registered(handle, descriptor)
    }

    fn report(&self, event: &Event) {
        (**self).report(event)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn region_registered(&self, handle: RegionHandle, descriptor: &str) {
        (**self).region_registered(handle, descriptor)
    }

    fn report(&self, event: &Event) {
        (**self).report(event)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn report(&self, _event: &Event) {}
}

/// Emits events through `tracing`
///
/// Region registrations are logged at info, events at debug under the
/// `hilo::events` target, so `HILO_LOG=hilo::events=debug` shows the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBackend;

impl Backend for LogBackend {
    fn region_registered(&self, handle: RegionHandle, descriptor: &str) {
        tracing::info!(target: "hilo::events", %handle, descriptor, "region registered");
    }

    fn report(&self, event: &Event) {
        tracing::debug!(
            target: "hilo::events",
            worker = event.worker.as_u32(),
            task = event.task.as_raw(),
            region = event.region.map(|r| r.as_raw()),
            "{}",
            event.kind
        );
    }
}

/// One line of json-lines output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Region {
        handle: RegionHandle,
        descriptor: String,
    },
    Event(Event),
}

/// Writes one JSON record per line
pub struct JsonLinesBackend {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    write_errors: AtomicU64,
}

impl JsonLinesBackend {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            write_errors: AtomicU64::new(0),
        }
    }

    /// Records that could not be written
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    fn write_record(&self, record: &Record) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_writer(&mut *writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = result {
            self.note_error(&e);
        }
    }

    fn note_error(&self, error: &std::io::Error) {
        if self.write_errors.fetch_add(1, Ordering::Relaxed) == 0 {
            tracing::warn!(%error, "json backend failed to write a record; further failures are counted silently");
        }
    }
}

impl Backend for JsonLinesBackend {
    fn region_registered(&self, handle: RegionHandle, descriptor: &str) {
        self.write_record(&Record::Region {
            handle,
            descriptor: descriptor.to_string(),
        });
    }

    fn report(&self, event: &Event) {
        self.write_record(&Record::Event(event.clone()));
    }

    fn flush(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.flush() {
            drop(writer);
            self.note_error(&e);
        }
    }
}

impl Drop for JsonLinesBackend {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingBackend {
    records: Mutex<Vec<Record>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|r| match r {
                Record::Event(e) => Some(e.clone()),
                Record::Region { .. } => None,
            })
            .collect()
    }

    /// Registered regions, in registration order
    pub fn regions(&self) -> Vec<(RegionHandle, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|r| match r {
                Record::Region { handle, descriptor } => Some((*handle, descriptor.clone())),
                Record::Event(_) => None,
            })
            .collect()
    }

    /// Drain all records
    pub fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

impl Backend for RecordingBackend {
    fn region_registered(&self, handle: RegionHandle, descriptor: &str) {
        self.push(Record::Region {
            handle,
            descriptor: descriptor.to_string(),
        });
    }

    fn report(&self, event: &Event) {
        self.push(Record::Event(event.clone()));
    }
}
