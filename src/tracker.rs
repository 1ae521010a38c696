//! Task context tracker
//!
//! The entry points instrumented code calls at every OpenMP construct
//! boundary. Each call resolves the construct's region handle, performs the
//! task-context bookkeeping the construct requires, and reports the boundary
//! to the [`Backend`].
//!
//! # Task context protocol
//!
//! ```text
//! main thread (T0)                         worker k
//! ─────────────────                        ────────
//! saved = fork(R)          saved = T0
//!                                          parallel_begin(R)   current = Tk (fresh)
//!   barrier_enter(B)       s = Tk            ...
//!   barrier_exit(B, s)     current = Tk    parallel_end(R)
//! join(R, saved)           current = T0
//!
//! c = task_create_begin(X) c.new_task = T9, c.saved = T0
//! task_create_end(X, c.saved)              task_begin(X, T9)   current = T9
//!                                          task_end(X)
//! ```
//!
//! Exits restore before reporting, so an exit event is attributed to the
//! logical task that entered the construct, not to whatever task the thread
//! happened to run at the scheduling point.
//!
//! # Region announcement
//!
//! Handles come from the process-wide [`Registry`] and are dense, so each
//! tracker keeps a cursor of how far its backend has been told about them.
//! Before reporting an event for handle `h`, every handle up to `h` that the
//! backend has not seen is announced through [`Backend::region_registered`],
//! once per tracker and in handle order. A tracker created late, or one that
//! meets a slot another tracker resolved, catches up the same way.

use crate::backend::Backend;
use crate::catalog::{RegionCatalog, RegionUnit};
use crate::event::{Construct, Event, EventKind, LockId, LockOp};
use crate::handle::{HandleSlot, RegionHandle};
use crate::registry::Registry;
use crate::task::{self, SavedTask, TaskHandle};
use crossbeam::utils::Backoff;
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of entering a task-creating construct
#[must_use = "the saved task must be handed to task_create_end"]
#[derive(Debug)]
pub struct TaskCreation {
    /// Identity of the task being created; passed to `task_begin` by whichever
    /// thread executes its body
    pub new_task: TaskHandle,
    /// The creating task, restored by `task_create_end`
    pub saved: SavedTask,
}

/// How far a backend has been told about region handles
///
/// `claimed` is the highest raw handle some thread took responsibility for
/// announcing; `announced` the highest one whose announcement completed.
/// Claims are contiguous ranges published in claim order.
#[derive(Debug, Default)]
struct RegionCursor {
    claimed: AtomicUsize,
    announced: AtomicUsize,
}

/// POMP2 adapter state: catalog and backend over the process-wide registry
pub struct Tracker<B> {
    registry: &'static Registry,
    catalog: RegionCatalog,
    cursor: RegionCursor,
    backend: B,
}

impl<B: Backend> Tracker<B> {
    pub fn new(backend: B) -> Self {
        Self {
            registry: Registry::global(),
            catalog: RegionCatalog::new(),
            cursor: RegionCursor::default(),
            backend,
        }
    }

    pub fn registry(&self) -> &'static Registry {
        self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve a slot, telling the backend about regions it has not seen.
    #[inline]
    pub fn resolve_with<'d, D>(&self, slot: &HandleSlot, descriptor: D) -> RegionHandle
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        let handle = self.registry.resolve_with(slot, descriptor);
        self.announce_through(handle);
        handle
    }

    /// Handle of a slot an enter call already resolved
    #[inline]
    fn resolved(&self, slot: &HandleSlot, construct: Construct) -> RegionHandle {
        let handle = self.registry.expect_resolved(slot, construct.name());
        self.announce_through(handle);
        handle
    }

    #[inline]
    fn announce_through(&self, handle: RegionHandle) {
        if self.cursor.announced.load(Ordering::Acquire) < handle.as_raw() {
            self.announce_slow(handle.as_raw());
        }
    }

    /// Announce every handle up to `target`, or wait for the thread that
    /// claimed them. No lock is held while the backend runs.
    #[cold]
    #[inline(never)]
    fn announce_slow(&self, target: usize) {
        let cursor = &self.cursor;
        let mut claimed = cursor.claimed.load(Ordering::Acquire);
        while claimed < target {
            match cursor.claimed.compare_exchange_weak(
                claimed,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    for index in claimed..target {
                        let handle = RegionHandle::from_index(index);
                        if let Some(descriptor) = self.registry.descriptor(handle) {
                            self.backend.region_registered(handle, &descriptor);
                        }
                    }
                    // Publish after every earlier claim has been published
                    let backoff = Backoff::new();
                    while cursor.announced.load(Ordering::Acquire) != claimed {
                        backoff.snooze();
                    }
                    cursor.announced.store(target, Ordering::Release);
                    return;
                }
                Err(actual) => claimed = actual,
            }
        }

        let backoff = Backoff::new();
        while cursor.announced.load(Ordering::Acquire) < target {
            backoff.snooze();
        }
    }

    /// Make a saved task current again.
    #[inline]
    fn restore(&self, saved: SavedTask) {
        let task = saved.task();
        debug_assert!(
            task::was_issued(task),
            "restoring task {} that was never issued; the saved task slot was not written by its enter call",
            task
        );
        task::replace_current_task(task);
    }

    /// Assign the handle of `slot` without reporting any event.
    #[inline]
    pub fn assign_handle(&self, slot: &HandleSlot, descriptor: &str) -> RegionHandle {
        self.resolve_with(slot, || Some(Cow::Borrowed(descriptor)))
    }

    /// A fresh task identity, unique across the process
    #[inline]
    pub fn new_task_handle(&self) -> TaskHandle {
        task::new_task_handle()
    }

    // ---------------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------------

    pub fn register_unit(&self, unit: &'static RegionUnit) -> bool {
        self.catalog.register(unit)
    }

    /// Number of instrumented regions known to the catalog
    pub fn num_regions(&self) -> usize {
        self.catalog.num_regions()
    }

    /// Assign the handle of every cataloged site.
    pub fn init_regions(&self) {
        self.catalog.init_regions(|slot, descriptor| {
            self.assign_handle(slot, descriptor);
        });
    }

    // ---------------------------------------------------------------------
    // Plain constructs: atomic, critical, flush, for, master, ordered,
    // section(s), single, workshare
    // ---------------------------------------------------------------------

    /// Before a construct (`*_enter`).
    pub fn enter(&self, construct: Construct, slot: &HandleSlot, descriptor: &str) {
        self.enter_with(construct, slot, || Some(Cow::Borrowed(descriptor)))
    }

    #[inline]
    pub fn enter_with<'d, D>(&self, construct: Construct, slot: &HandleSlot, descriptor: D)
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        debug_assert!(!construct.carries_task_context(), "{} is not a plain construct", construct);
        let region = self.resolve_with(slot, descriptor);
        self.emit(region, EventKind::Enter { construct });
    }

    /// After a construct (`*_exit`).
    #[inline]
    pub fn exit(&self, construct: Construct, slot: &HandleSlot) {
        let region = self.resolved(slot, construct);
        self.emit(region, EventKind::Exit { construct });
    }

    /// Start of a construct body whose handle was set by its enter call
    /// (critical, ordered, single).
    #[inline]
    pub fn begin(&self, construct: Construct, slot: &HandleSlot) {
        let region = self.resolved(slot, construct);
        self.emit(region, EventKind::Begin { construct });
    }

    /// Start of a construct body that has no enter call of its own
    /// (master, section).
    pub fn begin_with_descriptor(&self, construct: Construct, slot: &HandleSlot, descriptor: &str) {
        self.begin_with(construct, slot, || Some(Cow::Borrowed(descriptor)))
    }

    #[inline]
    pub fn begin_with<'d, D>(&self, construct: Construct, slot: &HandleSlot, descriptor: D)
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        let region = self.resolve_with(slot, descriptor);
        self.emit(region, EventKind::Begin { construct });
    }

    /// End of a construct body.
    #[inline]
    pub fn end(&self, construct: Construct, slot: &HandleSlot) {
        let region = self.resolved(slot, construct);
        self.emit(region, EventKind::End { construct });
    }

    // ---------------------------------------------------------------------
    // Scheduling points: barrier, implicit barrier, taskwait
    // ---------------------------------------------------------------------

    /// Enter a scheduling point, saving the current task.
    #[inline]
    pub fn scheduling_point_enter<'d, D>(
        &self,
        construct: Construct,
        slot: &HandleSlot,
        descriptor: D,
    ) -> SavedTask
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        debug_assert!(construct.is_scheduling_point(), "{} is not a scheduling point", construct);
        let region = self.resolve_with(slot, descriptor);
        let saved = SavedTask::new(task::current_task());
        self.emit(region, EventKind::Enter { construct });
        saved
    }

    /// Leave a scheduling point, restoring the task that entered it on
    /// whichever thread resumes here.
    #[inline]
    pub fn scheduling_point_exit(&self, construct: Construct, slot: &HandleSlot, saved: SavedTask) {
        let region = self.resolved(slot, construct);
        self.restore(saved);
        self.emit(region, EventKind::Exit { construct });
    }

    pub fn barrier_enter(&self, slot: &HandleSlot, descriptor: &str) -> SavedTask {
        self.scheduling_point_enter(Construct::Barrier, slot, || Some(Cow::Borrowed(descriptor)))
    }

    pub fn barrier_exit(&self, slot: &HandleSlot, saved: SavedTask) {
        self.scheduling_point_exit(Construct::Barrier, slot, saved)
    }

    pub fn implicit_barrier_enter(&self, slot: &HandleSlot, descriptor: &str) -> SavedTask {
        self.scheduling_point_enter(Construct::ImplicitBarrier, slot, || {
            Some(Cow::Borrowed(descriptor))
        })
    }

    pub fn implicit_barrier_exit(&self, slot: &HandleSlot, saved: SavedTask) {
        self.scheduling_point_exit(Construct::ImplicitBarrier, slot, saved)
    }

    pub fn taskwait_begin(&self, slot: &HandleSlot, descriptor: &str) -> SavedTask {
        self.scheduling_point_enter(Construct::Taskwait, slot, || Some(Cow::Borrowed(descriptor)))
    }

    pub fn taskwait_end(&self, slot: &HandleSlot, saved: SavedTask) {
        self.scheduling_point_exit(Construct::Taskwait, slot, saved)
    }

    // ---------------------------------------------------------------------
    // Parallel regions
    // ---------------------------------------------------------------------

    /// Before a parallel region, on the encountering thread.
    ///
    /// `if_clause` and `num_threads` are forwarded to the backend as given;
    /// the tracker does not act on them.
    pub fn fork(
        &self,
        slot: &HandleSlot,
        if_clause: bool,
        num_threads: u32,
        descriptor: &str,
    ) -> SavedTask {
        self.fork_with(slot, if_clause, num_threads, || Some(Cow::Borrowed(descriptor)))
    }

    #[inline]
    pub fn fork_with<'d, D>(
        &self,
        slot: &HandleSlot,
        if_clause: bool,
        num_threads: u32,
        descriptor: D,
    ) -> SavedTask
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        let region = self.resolve_with(slot, descriptor);
        let saved = SavedTask::new(task::current_task());
        self.emit(
            region,
            EventKind::Fork {
                if_clause,
                num_threads,
            },
        );
        saved
    }

    /// Each team member on entering the parallel body. Returns the fresh
    /// implicit task now current on this thread.
    #[inline]
    pub fn parallel_begin(&self, slot: &HandleSlot) -> TaskHandle {
        let region = self.resolved(slot, Construct::Parallel);
        let implicit = task::new_task_handle();
        task::replace_current_task(implicit);
        self.emit(
            region,
            EventKind::Begin {
                construct: Construct::Parallel,
            },
        );
        implicit
    }

    /// Each team member on leaving the parallel body.
    #[inline]
    pub fn parallel_end(&self, slot: &HandleSlot) {
        self.end(Construct::Parallel, slot)
    }

    /// After the region, on the encountering thread.
    #[inline]
    pub fn join(&self, slot: &HandleSlot, saved: SavedTask) {
        let region = self.resolved(slot, Construct::Parallel);
        self.restore(saved);
        self.emit(region, EventKind::Join);
    }

    // ---------------------------------------------------------------------
    // Explicit tasks
    // ---------------------------------------------------------------------

    /// Before a task construct, on the creating thread.
    pub fn task_create_begin(&self, slot: &HandleSlot, if_clause: bool, descriptor: &str) -> TaskCreation {
        self.create_begin(slot, if_clause, false, || Some(Cow::Borrowed(descriptor)))
    }

    /// After a task construct, on the creating thread: the creator continues.
    pub fn task_create_end(&self, slot: &HandleSlot, saved: SavedTask) {
        self.create_end(slot, saved, false)
    }

    /// Start of the task body, on whichever thread executes it.
    pub fn task_begin(&self, slot: &HandleSlot, task: TaskHandle) {
        self.body_begin(slot, task, false)
    }

    /// End of the task body. Restoring the executing thread's own task is up
    /// to the scheduling point that dispatched this task.
    pub fn task_end(&self, slot: &HandleSlot) {
        self.body_end(slot, false)
    }

    pub fn untied_task_create_begin(
        &self,
        slot: &HandleSlot,
        if_clause: bool,
        descriptor: &str,
    ) -> TaskCreation {
        self.create_begin(slot, if_clause, true, || Some(Cow::Borrowed(descriptor)))
    }

    pub fn untied_task_create_end(&self, slot: &HandleSlot, saved: SavedTask) {
        self.create_end(slot, saved, true)
    }

    pub fn untied_task_begin(&self, slot: &HandleSlot, task: TaskHandle) {
        self.body_begin(slot, task, true)
    }

    pub fn untied_task_end(&self, slot: &HandleSlot) {
        self.body_end(slot, true)
    }

    #[inline]
    pub fn create_begin<'d, D>(
        &self,
        slot: &HandleSlot,
        if_clause: bool,
        untied: bool,
        descriptor: D,
    ) -> TaskCreation
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        let region = self.resolve_with(slot, descriptor);
        let new_task = task::new_task_handle();
        let saved = SavedTask::new(task::current_task());
        self.emit(
            region,
            EventKind::TaskCreateBegin {
                new_task,
                if_clause,
                untied,
            },
        );
        TaskCreation { new_task, saved }
    }

    #[inline]
    pub fn create_end(&self, slot: &HandleSlot, saved: SavedTask, untied: bool) {
        let region = self.resolved(slot, task_construct(untied));
        self.restore(saved);
        self.emit(region, EventKind::TaskCreateEnd { untied });
    }

    #[inline]
    pub fn body_begin(&self, slot: &HandleSlot, task: TaskHandle, untied: bool) {
        let region = self.resolved(slot, task_construct(untied));
        task::replace_current_task(task);
        self.emit(region, EventKind::TaskBegin { untied });
    }

    #[inline]
    pub fn body_end(&self, slot: &HandleSlot, untied: bool) {
        let region = self.resolved(slot, task_construct(untied));
        self.emit(region, EventKind::TaskEnd { untied });
    }

    // ---------------------------------------------------------------------
    // Locks
    // ---------------------------------------------------------------------

    /// An OpenMP lock API call on `lock`.
    pub fn lock(&self, op: LockOp, lock: LockId, nested: bool) {
        self.backend.report(&Event {
            region: None,
            worker: task::worker_id(),
            task: task::current_task(),
            kind: EventKind::Lock { op, lock, nested },
        });
    }

    #[inline]
    fn emit(&self, region: RegionHandle, kind: EventKind) {
        self.backend.report(&Event {
            region: Some(region),
            worker: task::worker_id(),
            task: task::current_task(),
            kind,
        });
    }
}

fn task_construct(untied: bool) -> Construct {
    if untied {
        Construct::UntiedTask
    } else {
        Construct::Task
    }
}
