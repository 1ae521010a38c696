//! Region handle registry
//!
//! Maps construct descriptors to process-wide [`RegionHandle`]s and caches the
//! result in the caller's [`HandleSlot`]. Every tracker resolves through
//! [`Registry::global`], so a handle names the same descriptor everywhere in
//! the process.
//!
//! # Design
//!
//! ```text
//! resolve(slot, descriptor)
//!   │
//!   ├─ slot.get() == Some(h) ──────────────▶ h          (one acquire load)
//!   │
//!   └─ slow path
//!        ├─ CAS unset → busy   (winner)
//!        │     table.write() → intern(descriptor) → unlock
//!        │     slot.publish(h)                          (release store)
//!        │
//!        └─ lost the CAS       (racers on the same slot)
//!              Backoff::snooze() until slot.get() == Some(h)
//! ```
//!
//! Racers only ever wait on their own slot. The table write lock is held for a
//! single hash lookup/insert; readers (descriptor lookups, the debug reuse
//! check) share the read lock.
//!
//! The descriptor is trusted once a slot is resolved: re-entering a slot with a
//! different descriptor is a caller bug, checked only in debug builds.

use crate::error::{fatal, AdapterError};
use crate::handle::{HandleSlot, RegionHandle};
use crossbeam::utils::Backoff;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard};

/// Registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Distinct descriptors registered
    pub regions: usize,
    /// Slots initialized through the slow path
    pub slot_initializations: usize,
}

#[derive(Default)]
struct DescriptorTable {
    by_descriptor: FnvHashMap<Arc<str>, RegionHandle>,
    descriptors: Vec<Arc<str>>,
}

impl DescriptorTable {
    /// Returns the handle and whether this call created it.
    fn intern(&mut self, descriptor: &str) -> Result<(RegionHandle, bool), AdapterError> {
        if let Some(&handle) = self.by_descriptor.get(descriptor) {
            return Ok((handle, false));
        }

        let growth = |source| AdapterError::TableGrowth {
            descriptor: descriptor.to_string(),
            source,
        };
        self.descriptors.try_reserve(1).map_err(growth)?;
        self.by_descriptor.try_reserve(1).map_err(growth)?;

        let handle = RegionHandle::from_index(self.descriptors.len());
        let key: Arc<str> = Arc::from(descriptor);
        self.descriptors.push(Arc::clone(&key));
        self.by_descriptor.insert(key, handle);
        Ok((handle, true))
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Descriptor → handle table with slot-level init-once
#[derive(Default)]
pub struct Registry {
    table: RwLock<DescriptorTable>,
    slot_initializations: AtomicUsize,
}

impl Registry {
    /// The process-wide registry every [`Tracker`](crate::tracker::Tracker)
    /// resolves through
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::new)
    }

    /// A registry isolated from the process-wide one.
    ///
    /// Its handles are unique only within it, and a slot it resolved must not
    /// be handed to any other registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `slot`, registering `descriptor` if the slot is still unset.
    #[inline]
    pub fn resolve(&self, slot: &HandleSlot, descriptor: &str) -> RegionHandle {
        self.resolve_with(slot, || Some(Cow::Borrowed(descriptor)))
    }

    /// Resolve `slot`, producing the descriptor lazily.
    ///
    /// `descriptor` runs only on the slow path (and in debug builds, to check
    /// for slot reuse).
    #[inline]
    pub fn resolve_with<'d, D>(&self, slot: &HandleSlot, descriptor: D) -> RegionHandle
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        if let Some(handle) = slot.get() {
            #[cfg(debug_assertions)]
            self.check_descriptor(slot, handle, descriptor);
            return handle;
        }
        self.resolve_slow(slot, descriptor)
    }

    #[cold]
    #[inline(never)]
    fn resolve_slow<'d, D>(&self, slot: &HandleSlot, descriptor: D) -> RegionHandle
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        if slot.claim().is_err() {
            return wait_for_publish(slot);
        }

        let descriptor = match descriptor() {
            Some(descriptor) => descriptor,
            None => fatal(AdapterError::MissingDescriptor { slot: slot.addr() }),
        };

        let interned = self
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .intern(&descriptor);
        let (handle, created) = match interned {
            Ok(interned) => interned,
            Err(error) => fatal(error),
        };

        slot.publish(handle);
        self.slot_initializations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%handle, slot = slot.addr(), created, descriptor = %descriptor, "region handle assigned");
        handle
    }

    /// Handle of a slot that must already be resolved (exit/end calls).
    #[inline]
    pub fn expect_resolved(&self, slot: &HandleSlot, construct: &'static str) -> RegionHandle {
        debug_assert!(
            slot.is_resolved(),
            "{} exit on unresolved region handle slot {:#x}",
            construct,
            slot.addr()
        );
        match slot.get() {
            Some(handle) => handle,
            None => fatal(AdapterError::UnresolvedHandle {
                slot: slot.addr(),
                construct,
            }),
        }
    }

    /// Descriptor a handle was registered with
    pub fn descriptor(&self, handle: RegionHandle) -> Option<Arc<str>> {
        self.read().descriptors.get(handle.index()).cloned()
    }

    /// Handle registered for `descriptor`, without touching any slot
    pub fn lookup(&self, descriptor: &str) -> Option<RegionHandle> {
        self.read().by_descriptor.get(descriptor).copied()
    }

    /// Number of distinct descriptors registered
    pub fn len(&self) -> usize {
        self.read().descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            regions: self.len(),
            slot_initializations: self.slot_initializations.load(Ordering::Relaxed),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DescriptorTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(debug_assertions)]
    fn check_descriptor<'d, D>(&self, slot: &HandleSlot, handle: RegionHandle, descriptor: D)
    where
        D: FnOnce() -> Option<Cow<'d, str>>,
    {
        let Some(entered) = descriptor() else {
            return;
        };
        let registered = self.read().descriptors.get(handle.index()).cloned();
        if let Some(registered) = registered {
            assert!(
                *registered == *entered,
                "{}",
                AdapterError::DescriptorMismatch {
                    slot: slot.addr(),
                    registered: registered.to_string(),
                    entered: entered.into_owned(),
                }
            );
        }
    }
}

/// Spin, then yield, until the winning thread publishes the slot.
fn wait_for_publish(slot: &HandleSlot) -> RegionHandle {
    let backoff = Backoff::new();
    loop {
        if let Some(handle) = slot.get() {
            return handle;
        }
        backoff.snooze();
    }
}
