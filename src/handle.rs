//! Region handles and the slots that cache them
//!
//! The instrumenter materializes one handle slot per construct site. In C the
//! slot is a `void*` initialized to `NULL`; [`HandleSlot`] has the same layout
//! so the adapter can operate on that memory directly.
//!
//! ```text
//!   0            unset (NULL)
//!   usize::MAX   busy: one thread is registering the descriptor
//!   other        resolved handle value (table index + 1)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

const UNSET: usize = 0;
const BUSY: usize = usize::MAX;

/// Opaque, process-wide region handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionHandle(NonZeroUsize);

impl RegionHandle {
    pub(crate) fn from_index(index: usize) -> Self {
        // index + 1 stays below BUSY for any table that fits in memory
        match NonZeroUsize::new(index.wrapping_add(1)) {
            Some(raw) if raw.get() != BUSY => RegionHandle(raw),
            _ => unreachable!("region table index out of range"),
        }
    }

    pub(crate) fn index(self) -> usize {
        self.0.get() - 1
    }

    /// Raw handle value as stored in a slot
    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Write-once cell holding a [`RegionHandle`]
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct HandleSlot(AtomicUsize);

impl HandleSlot {
    /// An unset slot, usable in `static` items
    pub const fn new() -> Self {
        HandleSlot(AtomicUsize::new(UNSET))
    }

    /// View instrumenter-owned slot memory as a `HandleSlot`.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned for `usize`, valid for the returned
    /// lifetime, and only ever accessed through this adapter.
    pub unsafe fn from_ptr<'a, T>(ptr: *mut *mut T) -> &'a HandleSlot {
        debug_assert!(!ptr.is_null(), "null region handle slot");
        // SAFETY: HandleSlot is repr(transparent) over AtomicUsize, which has
        // the size and alignment of a pointer; the caller upholds validity.
        unsafe { &*(ptr as *const HandleSlot) }
    }

    /// Resolved handle, if any (single acquire load)
    #[inline]
    pub fn get(&self) -> Option<RegionHandle> {
        match self.0.load(Ordering::Acquire) {
            UNSET | BUSY => None,
            raw => NonZeroUsize::new(raw).map(RegionHandle),
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.get().is_some()
    }

    /// Address of the slot, used in diagnostics
    pub fn addr(&self) -> usize {
        self as *const HandleSlot as usize
    }

    /// Try to take the unset -> busy transition. `Err` carries the state seen.
    pub(crate) fn claim(&self) -> Result<(), usize> {
        self.0
            .compare_exchange(UNSET, BUSY, Ordering::Acquire, Ordering::Acquire)
            .map(|_| ())
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire) == BUSY
    }

    /// Publish the handle; pairs with the acquire load in [`HandleSlot::get`].
    pub(crate) fn publish(&self, handle: RegionHandle) {
        debug_assert!(self.is_busy(), "publishing into a slot that was not claimed");
        self.0.store(handle.as_raw(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_is_unset() {
        let slot = HandleSlot::new();
        assert_eq!(slot.get(), None);
        assert!(!slot.is_resolved());
    }

    #[test]
    fn test_claim_then_publish() {
        let slot = HandleSlot::new();
        assert!(slot.claim().is_ok());
        assert!(slot.is_busy());
        assert_eq!(slot.get(), None);

        let handle = RegionHandle::from_index(4);
        slot.publish(handle);
        assert_eq!(slot.get(), Some(handle));
        assert_eq!(handle.as_raw(), 5);
        assert_eq!(handle.index(), 4);
    }

    #[test]
    fn test_second_claim_fails() {
        let slot = HandleSlot::new();
        slot.claim().unwrap();
        assert_eq!(slot.claim(), Err(BUSY));
    }

    #[test]
    fn test_from_ptr_views_c_slot() {
        let mut c_slot: *mut std::ffi::c_void = std::ptr::null_mut();
        let slot = unsafe { HandleSlot::from_ptr(&mut c_slot) };
        slot.claim().unwrap();
        slot.publish(RegionHandle::from_index(0));
        assert_eq!(c_slot as usize, 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(RegionHandle::from_index(2).to_string(), "R3");
    }
}
