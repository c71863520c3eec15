//! Domain types for the ClaimGrid state store.
//!
//! These types represent the persisted state of the provider forest, the
//! inventories providers expose, and the allocations consumers hold against
//! them. All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonically increasing token for optimistic concurrency control.
pub type Generation = u64;

// ── Resource providers ─────────────────────────────────────────────

/// A node in the provider forest.
///
/// `root_uuid` is denormalized: it equals `uuid` for roots and the
/// transitive root otherwise. Reparenting rewrites it for the whole
/// subtree in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceProvider {
    pub uuid: Uuid,
    /// Human-readable name, unique across the store.
    pub name: String,
    pub parent_uuid: Option<Uuid>,
    pub root_uuid: Uuid,
    /// Bumped on any inventory/trait/aggregate/allocation mutation.
    pub generation: Generation,
}

impl ResourceProvider {
    pub fn is_root(&self) -> bool {
        self.parent_uuid.is_none()
    }
}

// ── Inventories ────────────────────────────────────────────────────

/// Quantitative inventory of one resource class on one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub total: u64,
    pub reserved: u64,
    pub min_unit: u64,
    pub max_unit: u64,
    pub step_size: u64,
    pub allocation_ratio: f64,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            total: 0,
            reserved: 0,
            min_unit: 1,
            max_unit: u64::MAX,
            step_size: 1,
            allocation_ratio: 1.0,
        }
    }
}

impl Inventory {
    /// Effective capacity: `floor(total * allocation_ratio) - reserved`,
    /// clamped at zero.
    pub fn capacity(&self) -> u64 {
        let scaled = (self.total as f64 * self.allocation_ratio).floor() as i128;
        (scaled - self.reserved as i128).max(0) as u64
    }

    /// Whether `amount` can be drawn given `used` units already allocated.
    ///
    /// Checks the unit constraints (`min_unit <= amount <= max_unit`,
    /// `(amount - min_unit) % step_size == 0`) and remaining capacity.
    pub fn fits(&self, amount: u64, used: u64) -> bool {
        self.unit_constraints_hold(amount) && used.saturating_add(amount) <= self.capacity()
    }

    /// The unit constraints alone, ignoring capacity.
    pub fn unit_constraints_hold(&self, amount: u64) -> bool {
        amount >= self.min_unit
            && amount <= self.max_unit
            && (amount - self.min_unit) % self.step_size.max(1) == 0
    }

    /// Structural validation applied before an inventory row is stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.reserved > self.total {
            return Err(format!(
                "reserved ({}) exceeds total ({})",
                self.reserved, self.total
            ));
        }
        if self.min_unit == 0 || self.step_size == 0 {
            return Err("min_unit and step_size must be at least 1".to_string());
        }
        if self.max_unit < self.min_unit {
            return Err(format!(
                "max_unit ({}) below min_unit ({})",
                self.max_unit, self.min_unit
            ));
        }
        if !(self.allocation_ratio.is_finite() && self.allocation_ratio > 0.0) {
            return Err(format!(
                "allocation_ratio ({}) must be positive",
                self.allocation_ratio
            ));
        }
        Ok(())
    }
}

/// Composite key for the inventories table.
pub fn inventory_key(rp: Uuid, resource_class: &str) -> String {
    format!("{rp}:{resource_class}")
}

// ── Consumers ──────────────────────────────────────────────────────

/// The holder of an allocation bundle.
///
/// Consumers are created implicitly on first allocation and removed when
/// their bundle empties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consumer {
    pub uuid: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub generation: Generation,
}

// ── Allocations ────────────────────────────────────────────────────

/// A quantity of one resource class drawn by a consumer from a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub consumer_uuid: Uuid,
    pub resource_provider_uuid: Uuid,
    pub resource_class: String,
    /// Always positive; zero-amount rows are never stored.
    pub used: u64,
}

impl Allocation {
    /// Composite key for the allocations table.
    pub fn table_key(&self) -> String {
        allocation_key(
            self.consumer_uuid,
            self.resource_provider_uuid,
            &self.resource_class,
        )
    }
}

/// Composite key for the allocations table.
pub fn allocation_key(consumer: Uuid, rp: Uuid, resource_class: &str) -> String {
    format!("{consumer}:{rp}:{resource_class}")
}
