//! Integration tests for the json-lines backend and its configuration
//!
//! # Test Coverage
//!
//! - `HILO_BACKEND=json` with `HILO_OUTPUT` writes one record per line
//! - One region record per descriptor, ahead of the events carrying it
//! - Every line decodes back into a `Record`
//! - Concurrent writers never interleave within a line

use hilo::backend::{Backend, Record};
use hilo::config::{AdapterConfig, BackendKind};
use hilo::event::EventKind;
use hilo::handle::HandleSlot;
use hilo::tracker::Tracker;
use std::collections::HashMap;
use std::fs;
use std::thread;
use tempfile::TempDir;

fn json_config(dir: &TempDir) -> AdapterConfig {
    let path = dir.path().join("events.jsonl");
    let vars: HashMap<&str, String> = [
        ("HILO_BACKEND", "json".to_string()),
        ("HILO_OUTPUT", path.display().to_string()),
    ]
    .into_iter()
    .collect();
    AdapterConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

fn read_records(dir: &TempDir) -> Vec<Record> {
    let contents = fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Events in file order, and the line index of the region record for `descriptor`
fn split_records(records: &[Record], descriptor: &str) -> (Vec<EventKind>, usize) {
    let region_lines: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, Record::Region { descriptor: d, .. } if d == descriptor))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(region_lines.len(), 1, "region {} announced {} times", descriptor, region_lines.len());
    let events = records
        .iter()
        .filter_map(|r| match r {
            Record::Event(e) => Some(e.kind.clone()),
            Record::Region { .. } => None,
        })
        .collect();
    (events, region_lines[0])
}

fn first_event_line(records: &[Record]) -> usize {
    records
        .iter()
        .position(|r| matches!(r, Record::Event(_)))
        .unwrap()
}

#[test]
fn test_json_backend_writes_configured_file() {
    let dir = TempDir::new().unwrap();
    let config = json_config(&dir);
    assert_eq!(config.backend, BackendKind::Json);

    let tracker = Tracker::new(config.build_backend().unwrap());
    let region = HandleSlot::new();
    let saved = tracker.fork(&region, true, 1, "parallel@json.c:4");
    tracker.parallel_begin(&region);
    tracker.parallel_end(&region);
    tracker.join(&region, saved);
    tracker.backend().flush();

    let records = read_records(&dir);
    let (kinds, region_line) = split_records(&records, "parallel@json.c:4");
    match &records[region_line] {
        Record::Region { handle, .. } => assert_eq!(Some(*handle), region.get()),
        other => panic!("expected region record, got {:?}", other),
    }
    assert!(region_line < first_event_line(&records));
    assert_eq!(kinds.len(), 4);
    assert_eq!(kinds.first(), Some(&EventKind::Fork { if_clause: true, num_threads: 1 }));
    assert_eq!(kinds.last(), Some(&EventKind::Join));
}

#[test]
fn test_json_backend_flushes_on_drop() {
    let dir = TempDir::new().unwrap();
    {
        let tracker = Tracker::new(json_config(&dir).build_backend().unwrap());
        let slot = HandleSlot::new();
        let saved = tracker.barrier_enter(&slot, "barrier@json.c:9");
        tracker.barrier_exit(&slot, saved);
    }

    let records = read_records(&dir);
    let (kinds, _) = split_records(&records, "barrier@json.c:9");
    assert_eq!(kinds.len(), 2);
}

#[test]
fn test_concurrent_writers_keep_lines_whole() {
    let dir = TempDir::new().unwrap();
    let tracker = Tracker::new(json_config(&dir).build_backend().unwrap());
    let slot = HandleSlot::new();

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..100 {
                    let saved = tracker.taskwait_begin(&slot, "taskwait@json.c:15");
                    tracker.taskwait_end(&slot, saved);
                }
            });
        }
    });
    tracker.backend().flush();

    let records = read_records(&dir);
    let (kinds, region_line) = split_records(&records, "taskwait@json.c:15");
    assert_eq!(kinds.len(), 8 * 100 * 2);
    assert!(region_line < first_event_line(&records));
}
