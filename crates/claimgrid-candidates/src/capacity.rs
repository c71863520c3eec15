//! Capacity view — which providers can supply an amount of a class.
//!
//! Usage is whatever the snapshot observed; the allocation writer
//! re-validates capacity under its own transaction, so stale reads here
//! cost only a retry, never an overcommit.

use uuid::Uuid;

use claimgrid_state::Snapshot;

/// Read-only capacity queries against one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct CapacityView<'a> {
    snapshot: &'a Snapshot,
}

impl<'a> CapacityView<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self { snapshot }
    }

    /// Whether `amount` of `resource_class` is assignable on `rp`.
    pub fn is_assignable(&self, rp: Uuid, resource_class: &str, amount: u64) -> bool {
        match self.snapshot.inventory(rp, resource_class) {
            Some(inventory) => inventory.fits(amount, self.snapshot.usage(rp, resource_class)),
            None => false,
        }
    }

    /// Providers where `amount` of `resource_class` is assignable,
    /// ascending by UUID.
    pub fn providers_for(&self, resource_class: &str, amount: u64) -> Vec<Uuid> {
        self.snapshot
            .providers
            .iter()
            .map(|p| p.uuid)
            .filter(|&rp| self.is_assignable(rp, resource_class, amount))
            .collect()
    }
}
