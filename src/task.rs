//! Task identities and per-thread task context
//!
//! Every worker thread has exactly one current task at any instant. It starts
//! as [`TaskHandle::ROOT`] and is only changed by the tracker at the hand-off
//! points of the POMP2 protocol (parallel begin, task begin, and the exits that
//! restore a [`SavedTask`]).
//!
//! Task identities come from one process-wide generator
//! ([`new_task_handle`]), are unique for the process run, and carry no
//! ordering: task 5 is not "before" task 3.

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Identifier of a logical, possibly deferred, unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(i64);

impl TaskHandle {
    /// Identity every thread starts with
    pub const ROOT: TaskHandle = TaskHandle(0);

    pub const fn from_raw(raw: i64) -> Self {
        TaskHandle(raw)
    }

    pub const fn as_raw(self) -> i64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Generator of fresh task identities
///
/// A single relaxed `fetch_add`: uniqueness is all that is required, there is
/// no happens-before relation to publish.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next: CachePadded<AtomicI64>,
}

impl TaskIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: CachePadded::new(AtomicI64::new(1)),
        }
    }

    /// A task identity no other caller has seen
    #[inline]
    pub fn next(&self) -> TaskHandle {
        TaskHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of identities handed out so far
    pub fn issued(&self) -> u64 {
        (self.next.load(Ordering::Relaxed) - 1) as u64
    }

    /// Whether `task` is root or was handed out by this generator
    pub fn has_issued(&self, task: TaskHandle) -> bool {
        task.0 >= 0 && task.0 < self.next.load(Ordering::Relaxed)
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A task identity saved by an "enter" call, to be restored by its "exit"
///
/// This is the caller-owned scratch slot of the POMP2 protocol. It is moved
/// into the matching exit call, so each saved identity is restored exactly
/// once. It may travel to another thread: a scheduling point can resume on a
/// different worker than the one that entered it.
#[must_use = "a saved task must be handed to the matching exit call"]
#[derive(Debug, PartialEq, Eq)]
pub struct SavedTask(TaskHandle);

impl SavedTask {
    pub(crate) fn new(task: TaskHandle) -> Self {
        SavedTask(task)
    }

    pub fn task(&self) -> TaskHandle {
        self.0
    }

    /// Rebuild a saved task from the value the instrumented code kept.
    pub fn from_raw(raw: i64) -> Self {
        SavedTask(TaskHandle(raw))
    }

    pub fn into_raw(self) -> i64 {
        self.0 .0
    }
}

/// Index of a worker thread, assigned on first use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

static TASK_IDS: TaskIdGenerator = TaskIdGenerator::new();
static NEXT_WORKER: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static CURRENT_TASK: Cell<TaskHandle> = const { Cell::new(TaskHandle::ROOT) };
    static WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// A fresh task identity, never handed out before in this process
#[inline]
pub fn new_task_handle() -> TaskHandle {
    TASK_IDS.next()
}

/// Whether `task` is root or came from [`new_task_handle`]
pub fn was_issued(task: TaskHandle) -> bool {
    TASK_IDS.has_issued(task)
}

/// Current task of the calling thread
#[inline]
pub fn current_task() -> TaskHandle {
    CURRENT_TASK.with(Cell::get)
}

/// Make `task` current on the calling thread, returning the previous one.
#[inline]
pub(crate) fn replace_current_task(task: TaskHandle) -> TaskHandle {
    CURRENT_TASK.with(|current| current.replace(task))
}

/// Worker identity of the calling thread
#[inline]
pub fn worker_id() -> WorkerId {
    WORKER.with(|worker| match worker.get() {
        Some(id) => id,
        None => {
            let id = WorkerId(NEXT_WORKER.fetch_add(1, Ordering::Relaxed));
            worker.set(Some(id));
            id
        }
    })
}
