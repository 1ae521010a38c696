//! Events reported to the measurement backend

use crate::handle::RegionHandle;
use crate::task::{TaskHandle, WorkerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of instrumented OpenMP construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Construct {
    Atomic,
    Barrier,
    ImplicitBarrier,
    Flush,
    Critical,
    For,
    Master,
    Parallel,
    Section,
    Sections,
    Single,
    Workshare,
    Ordered,
    Task,
    UntiedTask,
    Taskwait,
}

impl Construct {
    pub fn name(self) -> &'static str {
        match self {
            Construct::Atomic => "atomic",
            Construct::Barrier => "barrier",
            Construct::ImplicitBarrier => "implicit_barrier",
            Construct::Flush => "flush",
            Construct::Critical => "critical",
            Construct::For => "for",
            Construct::Master => "master",
            Construct::Parallel => "parallel",
            Construct::Section => "section",
            Construct::Sections => "sections",
            Construct::Single => "single",
            Construct::Workshare => "workshare",
            Construct::Ordered => "ordered",
            Construct::Task => "task",
            Construct::UntiedTask => "untied_task",
            Construct::Taskwait => "taskwait",
        }
    }

    /// Task scheduling points save and restore the current task
    pub fn is_scheduling_point(self) -> bool {
        matches!(
            self,
            Construct::Barrier | Construct::ImplicitBarrier | Construct::Taskwait
        )
    }

    /// Constructs whose enter/exit carry task context through a saved slot
    pub fn carries_task_context(self) -> bool {
        self.is_scheduling_point()
            || matches!(
                self,
                Construct::Parallel | Construct::Task | Construct::UntiedTask
            )
    }
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of an OpenMP lock variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(usize);

impl LockId {
    pub fn from_addr<T>(lock: *const T) -> Self {
        LockId(lock as usize)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// OpenMP lock API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOp {
    Init,
    Destroy,
    Set,
    Unset,
    Test { acquired: bool },
}

/// What happened at a construct boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Enter {
        construct: Construct,
    },
    Exit {
        construct: Construct,
    },
    Begin {
        construct: Construct,
    },
    End {
        construct: Construct,
    },
    Fork {
        if_clause: bool,
        num_threads: u32,
    },
    Join,
    TaskCreateBegin {
        new_task: TaskHandle,
        if_clause: bool,
        untied: bool,
    },
    TaskCreateEnd {
        untied: bool,
    },
    TaskBegin {
        untied: bool,
    },
    TaskEnd {
        untied: bool,
    },
    Lock {
        op: LockOp,
        lock: LockId,
        nested: bool,
    },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Enter { construct } => write!(f, "enter {}", construct),
            EventKind::Exit { construct } => write!(f, "exit {}", construct),
            EventKind::Begin { construct } => write!(f, "begin {}", construct),
            EventKind::End { construct } => write!(f, "end {}", construct),
            EventKind::Fork {
                if_clause,
                num_threads,
            } => write!(f, "fork if={} num_threads={}", if_clause, num_threads),
            EventKind::Join => f.write_str("join"),
            EventKind::TaskCreateBegin {
                new_task, untied, ..
            } => write!(
                f,
                "create {}task {}",
                if *untied { "untied " } else { "" },
                new_task
            ),
            EventKind::TaskCreateEnd { untied } => {
                write!(f, "create {}task end", if *untied { "untied " } else { "" })
            }
            EventKind::TaskBegin { untied } => {
                write!(f, "begin {}task", if *untied { "untied " } else { "" })
            }
            EventKind::TaskEnd { untied } => {
                write!(f, "end {}task", if *untied { "untied " } else { "" })
            }
            EventKind::Lock { op, lock, nested } => write!(
                f,
                "{}lock {:?} {:#x}",
                if *nested { "nest_" } else { "" },
                op,
                lock.as_usize()
            ),
        }
    }
}

/// One boundary crossing, as seen by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Region of the construct; `None` for lock API calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionHandle>,
    /// Worker thread reporting the event
    pub worker: WorkerId,
    /// Current task of that worker when the event is reported
    pub task: TaskHandle,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.worker, self.task, self.kind)?;
        if let Some(region) = self.region {
            write!(f, " {}", region)?;
        }
        Ok(())
    }
}
