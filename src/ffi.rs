//! POMP2 C ABI
//!
//! Exports the adapter side of the POMP2 interface so that code instrumented
//! by a POMP2 source-to-source instrumenter links against this crate built as
//! a `staticlib`. All calls go to one process-global [`Tracker`], created from
//! [`AdapterConfig::from_env`] on first use unless the host installed its own
//! with [`install`].
//!
//! `POMP2_Get_num_regions`, `POMP2_Init_regions` and `POMP2_Get_opari2_version`
//! are emitted by the instrumenter itself and are not exported here.
//!
//! Handle slots (`POMP2_Region_handle*`) and task slots (`POMP2_Task_handle*`)
//! are owned by the instrumented code. Initialization strings are only read
//! while a slot is still unset.

#![allow(non_snake_case, non_camel_case_types)]

use crate::backend::{Backend, LogBackend};
use crate::config::{init_logging, AdapterConfig};
use crate::event::Construct;
use crate::handle::HandleSlot;
use crate::task::{SavedTask, TaskHandle};
use crate::tracker::Tracker;
use libc::{c_char, c_int, c_void};
use std::borrow::Cow;
use std::ffi::CStr;
use std::sync::OnceLock;

/// `POMP2_Region_handle`
pub type POMP2_Region_handle = *mut c_void;
/// `POMP2_Task_handle`
pub type POMP2_Task_handle = i64;

/// Tracker type behind the C entry points
pub type GlobalTracker = Tracker<Box<dyn Backend>>;

static TRACKER: OnceLock<GlobalTracker> = OnceLock::new();

/// Install the process-global tracker. Fails (returning it) if one exists.
pub fn install(tracker: GlobalTracker) -> Result<(), GlobalTracker> {
    TRACKER.set(tracker)?;
    register_exit_flush();
    Ok(())
}

/// The process-global tracker, created from the environment on first use
#[inline]
pub fn tracker() -> &'static GlobalTracker {
    TRACKER.get_or_init(|| {
        let config = AdapterConfig::from_env();
        init_logging(&config.log_filter);
        let backend: Box<dyn Backend> = match config.build_backend() {
            Ok(backend) => backend,
            Err(error) => {
                tracing::warn!(error = %format!("{:#}", error), "falling back to log backend");
                Box::new(LogBackend)
            }
        };
        tracing::debug!(backend = %config.backend, version = crate::version(), "POMP2 adapter initialized");
        register_exit_flush();
        Tracker::new(backend)
    })
}

extern "C" fn flush_at_exit() {
    if let Some(tracker) = TRACKER.get() {
        tracker.backend().flush();
    }
}

/// The global tracker is never dropped; flush buffered backend output when
/// the program exits.
fn register_exit_flush() {
    // SAFETY: flush_at_exit is a plain extern "C" fn with no preconditions
    if unsafe { libc::atexit(flush_at_exit) } != 0 {
        tracing::warn!("could not register exit handler; buffered events may be lost");
    }
}

/// # Safety
///
/// `handle` must point to an instrumenter-owned region handle slot.
#[inline]
unsafe fn slot<'a>(handle: *mut POMP2_Region_handle) -> &'a HandleSlot {
    // SAFETY: forwarded from the caller
    unsafe { HandleSlot::from_ptr(handle) }
}

/// Lazy view of a C initialization string
///
/// # Safety
///
/// `ctc` must be null or a NUL-terminated string alive for `'a`.
#[inline]
unsafe fn init_string<'a>(ctc: *const c_char) -> impl FnOnce() -> Option<Cow<'a, str>> {
    move || {
        if ctc.is_null() {
            None
        } else {
            // SAFETY: non-null and NUL-terminated per the caller
            Some(unsafe { CStr::from_ptr(ctc) }.to_string_lossy())
        }
    }
}

/// # Safety
///
/// `out` must be a valid, writable task slot.
#[inline]
unsafe fn store(out: *mut POMP2_Task_handle, value: i64) {
    debug_assert!(!out.is_null(), "null task slot");
    // SAFETY: forwarded from the caller
    unsafe { out.write(value) }
}

#[no_mangle]
pub extern "C" fn POMP2_Get_new_task_handle() -> POMP2_Task_handle {
    tracker().new_task_handle().as_raw()
}

/// # Safety
///
/// See the module documentation for slot and string requirements.
#[no_mangle]
pub unsafe extern "C" fn POMP2_Assign_handle(
    pomp2_handle: *mut POMP2_Region_handle,
    ctc_string: *const c_char,
) {
    unsafe {
        tracker().resolve_with(slot(pomp2_handle), init_string(ctc_string));
    }
}

// -------------------------------------------------------------------------
// Plain constructs
// -------------------------------------------------------------------------

macro_rules! plain_enter_exit {
    ($($enter:ident / $exit:ident => $construct:expr;)*) => {$(
        /// # Safety
        ///
        /// See the module documentation for slot and string requirements.
        #[no_mangle]
        pub unsafe extern "C" fn $enter(
            pomp2_handle: *mut POMP2_Region_handle,
            ctc_string: *const c_char,
        ) {
            unsafe { tracker().enter_with($construct, slot(pomp2_handle), init_string(ctc_string)) }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the matching enter call.
        #[no_mangle]
        pub unsafe extern "C" fn $exit(pomp2_handle: *mut POMP2_Region_handle) {
            unsafe { tracker().exit($construct, slot(pomp2_handle)) }
        }
    )*};
}

plain_enter_exit! {
    POMP2_Atomic_enter / POMP2_Atomic_exit => Construct::Atomic;
    POMP2_Flush_enter / POMP2_Flush_exit => Construct::Flush;
    POMP2_Critical_enter / POMP2_Critical_exit => Construct::Critical;
    POMP2_For_enter / POMP2_For_exit => Construct::For;
    POMP2_Sections_enter / POMP2_Sections_exit => Construct::Sections;
    POMP2_Single_enter / POMP2_Single_exit => Construct::Single;
    POMP2_Workshare_enter / POMP2_Workshare_exit => Construct::Workshare;
    POMP2_Ordered_enter / POMP2_Ordered_exit => Construct::Ordered;
}

// Bodies whose handle was assigned by the enter call
macro_rules! body_begin_end {
    ($($begin:ident / $end:ident => $construct:expr;)*) => {$(
        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the construct's enter call.
        #[no_mangle]
        pub unsafe extern "C" fn $begin(pomp2_handle: *mut POMP2_Region_handle) {
            unsafe { tracker().begin($construct, slot(pomp2_handle)) }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the matching begin call.
        #[no_mangle]
        pub unsafe extern "C" fn $end(pomp2_handle: *mut POMP2_Region_handle) {
            unsafe { tracker().end($construct, slot(pomp2_handle)) }
        }
    )*};
}

body_begin_end! {
    POMP2_Critical_begin / POMP2_Critical_end => Construct::Critical;
    POMP2_Single_begin / POMP2_Single_end => Construct::Single;
    POMP2_Ordered_begin / POMP2_Ordered_end => Construct::Ordered;
}

// Bodies without an enter call carry the initialization string themselves
macro_rules! described_begin_end {
    ($($begin:ident / $end:ident => $construct:expr;)*) => {$(
        /// # Safety
        ///
        /// See the module documentation for slot and string requirements.
        #[no_mangle]
        pub unsafe extern "C" fn $begin(
            pomp2_handle: *mut POMP2_Region_handle,
            ctc_string: *const c_char,
        ) {
            unsafe { tracker().begin_with($construct, slot(pomp2_handle), init_string(ctc_string)) }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the matching begin call.
        #[no_mangle]
        pub unsafe extern "C" fn $end(pomp2_handle: *mut POMP2_Region_handle) {
            unsafe { tracker().end($construct, slot(pomp2_handle)) }
        }
    )*};
}

described_begin_end! {
    POMP2_Master_begin / POMP2_Master_end => Construct::Master;
    POMP2_Section_begin / POMP2_Section_end => Construct::Section;
}

// -------------------------------------------------------------------------
// Scheduling points
// -------------------------------------------------------------------------

macro_rules! scheduling_point {
    ($($enter:ident / $exit:ident => $construct:expr;)*) => {$(
        /// # Safety
        ///
        /// See the module documentation for slot and string requirements;
        /// `pomp2_old_task` must be writable.
        #[no_mangle]
        pub unsafe extern "C" fn $enter(
            pomp2_handle: *mut POMP2_Region_handle,
            pomp2_old_task: *mut POMP2_Task_handle,
            ctc_string: *const c_char,
        ) {
            unsafe {
                let saved = tracker().scheduling_point_enter(
                    $construct,
                    slot(pomp2_handle),
                    init_string(ctc_string),
                );
                store(pomp2_old_task, saved.into_raw());
            }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the matching enter call.
        #[no_mangle]
        pub unsafe extern "C" fn $exit(
            pomp2_handle: *mut POMP2_Region_handle,
            pomp2_old_task: POMP2_Task_handle,
        ) {
            unsafe {
                tracker().scheduling_point_exit(
                    $construct,
                    slot(pomp2_handle),
                    SavedTask::from_raw(pomp2_old_task),
                )
            }
        }
    )*};
}

scheduling_point! {
    POMP2_Barrier_enter / POMP2_Barrier_exit => Construct::Barrier;
    POMP2_Implicit_barrier_enter / POMP2_Implicit_barrier_exit => Construct::ImplicitBarrier;
    POMP2_Taskwait_begin / POMP2_Taskwait_end => Construct::Taskwait;
}

// -------------------------------------------------------------------------
// Parallel regions
// -------------------------------------------------------------------------

/// # Safety
///
/// See the module documentation for slot and string requirements;
/// `pomp2_old_task` must be writable.
#[no_mangle]
pub unsafe extern "C" fn POMP2_Parallel_fork(
    pomp2_handle: *mut POMP2_Region_handle,
    if_clause: c_int,
    num_threads: c_int,
    pomp2_old_task: *mut POMP2_Task_handle,
    ctc_string: *const c_char,
) {
    unsafe {
        let saved = tracker().fork_with(
            slot(pomp2_handle),
            if_clause != 0,
            num_threads.max(0) as u32,
            init_string(ctc_string),
        );
        store(pomp2_old_task, saved.into_raw());
    }
}

/// # Safety
///
/// `pomp2_handle` must have been passed to `POMP2_Parallel_fork`.
#[no_mangle]
pub unsafe extern "C" fn POMP2_Parallel_begin(pomp2_handle: *mut POMP2_Region_handle) {
    unsafe {
        tracker().parallel_begin(slot(pomp2_handle));
    }
}

/// # Safety
///
/// `pomp2_handle` must have been passed to `POMP2_Parallel_fork`.
#[no_mangle]
pub unsafe extern "C" fn POMP2_Parallel_end(pomp2_handle: *mut POMP2_Region_handle) {
    unsafe { tracker().parallel_end(slot(pomp2_handle)) }
}

/// # Safety
///
/// `pomp2_handle` must have been passed to `POMP2_Parallel_fork`.
#[no_mangle]
pub unsafe extern "C" fn POMP2_Parallel_join(
    pomp2_handle: *mut POMP2_Region_handle,
    pomp2_old_task: POMP2_Task_handle,
) {
    unsafe { tracker().join(slot(pomp2_handle), SavedTask::from_raw(pomp2_old_task)) }
}

// -------------------------------------------------------------------------
// Tasks
// -------------------------------------------------------------------------

macro_rules! task_functions {
    ($untied:expr => $create_begin:ident, $create_end:ident, $begin:ident, $end:ident) => {
        /// # Safety
        ///
        /// See the module documentation for slot and string requirements;
        /// both task slots must be writable.
        #[no_mangle]
        pub unsafe extern "C" fn $create_begin(
            pomp2_handle: *mut POMP2_Region_handle,
            pomp2_new_task: *mut POMP2_Task_handle,
            pomp2_old_task: *mut POMP2_Task_handle,
            pomp2_if: c_int,
            ctc_string: *const c_char,
        ) {
            unsafe {
                let creation = tracker().create_begin(
                    slot(pomp2_handle),
                    pomp2_if != 0,
                    $untied,
                    init_string(ctc_string),
                );
                store(pomp2_new_task, creation.new_task.as_raw());
                store(pomp2_old_task, creation.saved.into_raw());
            }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the create-begin call.
        #[no_mangle]
        pub unsafe extern "C" fn $create_end(
            pomp2_handle: *mut POMP2_Region_handle,
            pomp2_old_task: POMP2_Task_handle,
        ) {
            unsafe {
                tracker().create_end(
                    slot(pomp2_handle),
                    SavedTask::from_raw(pomp2_old_task),
                    $untied,
                )
            }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the create-begin call.
        #[no_mangle]
        pub unsafe extern "C" fn $begin(
            pomp2_handle: *mut POMP2_Region_handle,
            pomp2_task: POMP2_Task_handle,
        ) {
            unsafe {
                tracker().body_begin(slot(pomp2_handle), TaskHandle::from_raw(pomp2_task), $untied)
            }
        }

        /// # Safety
        ///
        /// `pomp2_handle` must have been passed to the create-begin call.
        #[no_mangle]
        pub unsafe extern "C" fn $end(pomp2_handle: *mut POMP2_Region_handle) {
            unsafe { tracker().body_end(slot(pomp2_handle), $untied) }
        }
    };
}

task_functions!(false => POMP2_Task_create_begin, POMP2_Task_create_end, POMP2_Task_begin, POMP2_Task_end);
task_functions!(true => POMP2_Untied_task_create_begin, POMP2_Untied_task_create_end, POMP2_Untied_task_begin, POMP2_Untied_task_end);

// -------------------------------------------------------------------------
// OpenMP runtime wrappers
// -------------------------------------------------------------------------

#[cfg(feature = "openmp")]
mod openmp {
    use super::tracker;
    use crate::event::{LockId, LockOp};
    use libc::c_int;

    /// Opaque `omp_lock_t`
    #[repr(C)]
    pub struct omp_lock_t {
        _private: [u8; 0],
    }

    /// Opaque `omp_nest_lock_t`
    #[repr(C)]
    pub struct omp_nest_lock_t {
        _private: [u8; 0],
    }

    extern "C" {
        fn omp_get_max_threads() -> c_int;
        fn omp_init_lock(lock: *mut omp_lock_t);
        fn omp_destroy_lock(lock: *mut omp_lock_t);
        fn omp_set_lock(lock: *mut omp_lock_t);
        fn omp_unset_lock(lock: *mut omp_lock_t);
        fn omp_test_lock(lock: *mut omp_lock_t) -> c_int;
        fn omp_init_nest_lock(lock: *mut omp_nest_lock_t);
        fn omp_destroy_nest_lock(lock: *mut omp_nest_lock_t);
        fn omp_set_nest_lock(lock: *mut omp_nest_lock_t);
        fn omp_unset_nest_lock(lock: *mut omp_nest_lock_t);
        fn omp_test_nest_lock(lock: *mut omp_nest_lock_t) -> c_int;
    }

    #[no_mangle]
    pub extern "C" fn POMP2_Lib_get_max_threads() -> c_int {
        // SAFETY: no preconditions
        unsafe { omp_get_max_threads() }
    }

    macro_rules! lock_wrappers {
        ($ty:ty, $nested:expr => $init:ident($omp_init:ident), $destroy:ident($omp_destroy:ident),
         $set:ident($omp_set:ident), $unset:ident($omp_unset:ident), $test:ident($omp_test:ident)) => {
            /// # Safety
            ///
            /// `s` must be a valid OpenMP lock.
            #[no_mangle]
            pub unsafe extern "C" fn $init(s: *mut $ty) {
                unsafe { $omp_init(s) };
                tracker().lock(LockOp::Init, LockId::from_addr(s as *const $ty), $nested);
            }

            /// # Safety
            ///
            /// `s` must be an initialized OpenMP lock.
            #[no_mangle]
            pub unsafe extern "C" fn $destroy(s: *mut $ty) {
                tracker().lock(LockOp::Destroy, LockId::from_addr(s as *const $ty), $nested);
                unsafe { $omp_destroy(s) };
            }

            /// # Safety
            ///
            /// `s` must be an initialized OpenMP lock.
            #[no_mangle]
            pub unsafe extern "C" fn $set(s: *mut $ty) {
                unsafe { $omp_set(s) };
                tracker().lock(LockOp::Set, LockId::from_addr(s as *const $ty), $nested);
            }

            /// # Safety
            ///
            /// `s` must be an OpenMP lock held by the calling task.
            #[no_mangle]
            pub unsafe extern "C" fn $unset(s: *mut $ty) {
                tracker().lock(LockOp::Unset, LockId::from_addr(s as *const $ty), $nested);
                unsafe { $omp_unset(s) };
            }

            /// # Safety
            ///
            /// `s` must be an initialized OpenMP lock.
            #[no_mangle]
            pub unsafe extern "C" fn $test(s: *mut $ty) -> c_int {
                let result = unsafe { $omp_test(s) };
                tracker().lock(
                    LockOp::Test {
                        acquired: result != 0,
                    },
                    LockId::from_addr(s as *const $ty),
                    $nested,
                );
                result
            }
        };
    }

    lock_wrappers!(omp_lock_t, false =>
        POMP2_Init_lock(omp_init_lock), POMP2_Destroy_lock(omp_destroy_lock),
        POMP2_Set_lock(omp_set_lock), POMP2_Unset_lock(omp_unset_lock),
        POMP2_Test_lock(omp_test_lock));

    lock_wrappers!(omp_nest_lock_t, true =>
        POMP2_Init_nest_lock(omp_init_nest_lock), POMP2_Destroy_nest_lock(omp_destroy_nest_lock),
        POMP2_Set_nest_lock(omp_set_nest_lock), POMP2_Unset_nest_lock(omp_unset_nest_lock),
        POMP2_Test_nest_lock(omp_test_nest_lock));
}

#[cfg(feature = "openmp")]
pub use openmp::{omp_lock_t, omp_nest_lock_t};
