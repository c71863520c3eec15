//! Point-in-time read view of the store for the candidate solver.
//!
//! The solver takes no locks and tolerates staleness (the allocation writer
//! revalidates at commit), but it must not see a torn view: all tables are
//! read in one redb read transaction.

use std::collections::{BTreeMap, BTreeSet};

use redb::ReadableTable;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::store::{map_err, StateStore};
use crate::tables::*;
use crate::types::*;

/// Everything the solver needs, loaded once per request.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// All providers, ascending by UUID.
    pub providers: Vec<ResourceProvider>,
    /// Inventory rows keyed by `(provider, resource class)`.
    pub inventories: BTreeMap<(Uuid, String), Inventory>,
    /// Trait sets per provider (absent means empty).
    pub traits: BTreeMap<Uuid, BTreeSet<String>>,
    /// Aggregate memberships per provider (absent means empty).
    pub aggregates: BTreeMap<Uuid, BTreeSet<Uuid>>,
    /// Live usage sums keyed by `(provider, resource class)`.
    pub usages: BTreeMap<(Uuid, String), u64>,
}

impl Snapshot {
    pub fn inventory(&self, rp: Uuid, resource_class: &str) -> Option<&Inventory> {
        self.inventories.get(&(rp, resource_class.to_string()))
    }

    pub fn usage(&self, rp: Uuid, resource_class: &str) -> u64 {
        self.usages
            .get(&(rp, resource_class.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn traits_of(&self, rp: Uuid) -> Option<&BTreeSet<String>> {
        self.traits.get(&rp)
    }

    pub fn aggregates_of(&self, rp: Uuid) -> Option<&BTreeSet<Uuid>> {
        self.aggregates.get(&rp)
    }
}

impl StateStore {
    /// Load a consistent snapshot of providers, inventories, traits,
    /// aggregates, and usage sums in a single read transaction.
    pub fn snapshot(&self) -> StateResult<Snapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut snapshot = Snapshot::default();

        let providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        for entry in providers.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let provider: ResourceProvider =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            snapshot.providers.push(provider);
        }
        snapshot.providers.sort_by_key(|p| p.uuid);

        let inventories = txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
        for entry in inventories.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let (rp, resource_class) = split_inventory_key(key.value())?;
            let inventory: Inventory =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            snapshot.inventories.insert((rp, resource_class), inventory);
        }

        let traits = txn.open_table(PROVIDER_TRAITS).map_err(map_err!(Table))?;
        for entry in traits.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let rp = parse_uuid(key.value())?;
            let set: BTreeSet<String> =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            snapshot.traits.insert(rp, set);
        }

        let aggregates = txn
            .open_table(PROVIDER_AGGREGATES)
            .map_err(map_err!(Table))?;
        for entry in aggregates.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let rp = parse_uuid(key.value())?;
            let set: BTreeSet<Uuid> =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            snapshot.aggregates.insert(rp, set);
        }

        let allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        for entry in allocations.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: Allocation =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            *snapshot
                .usages
                .entry((row.resource_provider_uuid, row.resource_class))
                .or_insert(0) += row.used;
        }

        Ok(snapshot)
    }
}

fn parse_uuid(raw: &str) -> StateResult<Uuid> {
    raw.parse()
        .map_err(|_| StateError::Deserialize(format!("malformed uuid key: {raw:?}")))
}

fn split_inventory_key(key: &str) -> StateResult<(Uuid, String)> {
    match key.split_once(':') {
        Some((rp, resource_class)) if !resource_class.is_empty() => {
            Ok((parse_uuid(rp)?, resource_class.to_string()))
        }
        _ => Err(StateError::Deserialize(format!(
            "malformed inventory key: {key:?}"
        ))),
    }
}
