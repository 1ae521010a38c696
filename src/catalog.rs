//! Catalog of instrumented region sites, for warm-up registration
//!
//! Each instrumented compilation unit contributes a [`RegionUnit`] listing its
//! handle slots and descriptors. Tooling can then count the sites and assign
//! every handle up front, without executing any application code.

use crate::handle::HandleSlot;
use crate::registry::Registry;
use std::sync::{Mutex, PoisonError};

/// One instrumentation site: a handle slot and its descriptor
#[derive(Debug)]
pub struct RegionSite {
    pub slot: &'static HandleSlot,
    pub descriptor: &'static str,
}

/// All sites of one instrumented compilation unit
#[derive(Debug)]
pub struct RegionUnit {
    pub name: &'static str,
    pub sites: &'static [RegionSite],
}

#[derive(Debug, Default)]
pub struct RegionCatalog {
    units: Mutex<Vec<&'static RegionUnit>>,
}

impl RegionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit. Registering the same unit twice has no effect.
    pub fn register(&self, unit: &'static RegionUnit) -> bool {
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        if units.iter().any(|u| std::ptr::eq(*u, unit)) {
            return false;
        }
        tracing::debug!(unit = unit.name, regions = unit.sites.len(), "region unit registered");
        units.push(unit);
        true
    }

    /// Total number of instrumented regions across all units
    pub fn num_regions(&self) -> usize {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|u| u.sites.len())
            .sum()
    }

    /// Resolve the handle of every known site through `resolve`.
    pub fn init_regions<F>(&self, mut resolve: F)
    where
        F: FnMut(&'static HandleSlot, &'static str),
    {
        // Snapshot so resolution (and whatever the backend does) runs unlocked
        let units: Vec<&'static RegionUnit> = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for unit in units {
            for site in unit.sites {
                resolve(site.slot, site.descriptor);
            }
        }
    }

    /// Resolve every known site directly against `registry`.
    pub fn init_with_registry(&self, registry: &Registry) {
        self.init_regions(|slot, descriptor| {
            registry.resolve(slot, descriptor);
        });
    }
}
