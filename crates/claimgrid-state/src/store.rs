//! StateStore — redb-backed persistence for the provider forest.
//!
//! Provides typed CRUD operations over providers, inventories, traits,
//! aggregates, consumers, and allocations. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Mutations take the generation the caller last observed and CAS against
//! it; a mismatch fails with [`StateError::Conflict`] and the caller is
//! expected to re-read and retry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use claimgrid_core::names;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}
pub(crate) use map_err;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
}

/// Read a JSON row out of any readable table.
pub(crate) fn read_json<V: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<V>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(
            serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
        )),
        None => Ok(None),
    }
}

pub(crate) fn to_json<V: serde::Serialize>(value: &V) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

/// Load a provider row, insisting it exists and that the caller's
/// generation still matches.
pub(crate) fn load_provider_checked(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    uuid: Uuid,
    generation: Generation,
) -> StateResult<ResourceProvider> {
    let provider: ResourceProvider = read_json(table, &uuid.to_string())?
        .ok_or_else(|| StateError::NotFound(format!("resource provider {uuid}")))?;
    if provider.generation != generation {
        return Err(StateError::Conflict(format!(
            "resource provider {uuid}: expected generation {generation}, found {}",
            provider.generation
        )));
    }
    Ok(provider)
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
        txn.open_table(PROVIDER_TRAITS).map_err(map_err!(Table))?;
        txn.open_table(PROVIDER_AGGREGATES).map_err(map_err!(Table))?;
        txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Providers ──────────────────────────────────────────────────

    /// Create a provider, as a root (`parent_uuid: None`) or as a child.
    pub fn create_provider(
        &self,
        uuid: Uuid,
        name: &str,
        parent_uuid: Option<Uuid>,
    ) -> StateResult<ResourceProvider> {
        if name.is_empty() {
            return Err(StateError::BadRequest("provider name is empty".to_string()));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let provider;
        {
            let mut table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            if read_json::<ResourceProvider>(&table, &uuid.to_string())?.is_some() {
                return Err(StateError::Exists(format!("resource provider {uuid}")));
            }
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: ResourceProvider =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if existing.name == name {
                    return Err(StateError::Exists(format!("provider name {name:?}")));
                }
            }
            let root_uuid = match parent_uuid {
                Some(parent) => {
                    let parent_row: ResourceProvider = read_json(&table, &parent.to_string())?
                        .ok_or_else(|| {
                            StateError::NotFound(format!("parent provider {parent}"))
                        })?;
                    parent_row.root_uuid
                }
                None => uuid,
            };
            provider = ResourceProvider {
                uuid,
                name: name.to_string(),
                parent_uuid,
                root_uuid,
                generation: 0,
            };
            table
                .insert(uuid.to_string().as_str(), to_json(&provider)?.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, name, "provider created");
        Ok(provider)
    }

    /// Get a provider by UUID.
    pub fn get_provider(&self, uuid: Uuid) -> StateResult<Option<ResourceProvider>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        read_json(&table, &uuid.to_string())
    }

    /// List all providers, ascending by UUID.
    pub fn list_providers(&self) -> StateResult<Vec<ResourceProvider>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let provider: ResourceProvider =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(provider);
        }
        results.sort_by_key(|p| p.uuid);
        Ok(results)
    }

    /// Move a provider under `new_parent`, or make it a root (`None`).
    ///
    /// A provider may only move to a parent in its current tree; moving
    /// across trees is expressed as reparent-to-root followed by nothing —
    /// adopted subtrees are not supported. The whole subtree's denormalized
    /// `root_uuid` is rewritten in the same transaction.
    pub fn reparent_provider(
        &self,
        uuid: Uuid,
        generation: Generation,
        new_parent: Option<Uuid>,
    ) -> StateResult<ResourceProvider> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let provider = load_provider_checked(&table, uuid, generation)?;

            // Load the whole forest once; reparenting needs ancestor walks
            // and a subtree sweep.
            let mut all: HashMap<Uuid, ResourceProvider> = HashMap::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let row: ResourceProvider =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                all.insert(row.uuid, row);
            }

            let new_root = match new_parent {
                None => uuid,
                Some(parent) => {
                    if parent == uuid {
                        return Err(StateError::BadRequest(format!(
                            "provider {uuid} cannot be its own parent"
                        )));
                    }
                    let parent_row = all.get(&parent).ok_or_else(|| {
                        StateError::NotFound(format!("parent provider {parent}"))
                    })?;
                    if parent_row.root_uuid != provider.root_uuid {
                        return Err(StateError::BadRequest(format!(
                            "provider {uuid} may only move within tree {}",
                            provider.root_uuid
                        )));
                    }
                    // Walking up from the new parent must not pass through
                    // the moved provider, or we'd create a cycle.
                    let mut cursor = Some(parent);
                    while let Some(current) = cursor {
                        if current == uuid {
                            return Err(StateError::BadRequest(format!(
                                "moving provider {uuid} under {parent} would create a cycle"
                            )));
                        }
                        cursor = all.get(&current).and_then(|p| p.parent_uuid);
                    }
                    parent_row.root_uuid
                }
            };

            // Collect the moved subtree (children discovered via parent links).
            let mut children_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
            for row in all.values() {
                if let Some(parent) = row.parent_uuid {
                    children_of.entry(parent).or_default().push(row.uuid);
                }
            }
            let mut subtree = vec![uuid];
            let mut frontier = vec![uuid];
            while let Some(current) = frontier.pop() {
                for &child in children_of.get(&current).into_iter().flatten() {
                    subtree.push(child);
                    frontier.push(child);
                }
            }

            for member in subtree {
                let mut row = all.remove(&member).ok_or_else(|| {
                    StateError::InvariantViolation(format!("subtree member {member} vanished"))
                })?;
                row.root_uuid = new_root;
                if member == uuid {
                    row.parent_uuid = new_parent;
                    row.generation += 1;
                }
                table
                    .insert(member.to_string().as_str(), to_json(&row)?.as_slice())
                    .map_err(map_err!(Write))?;
            }
            updated = read_json::<ResourceProvider>(&table, &uuid.to_string())?
                .ok_or_else(|| StateError::InvariantViolation(format!("provider {uuid} vanished")))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, parent = ?new_parent, "provider reparented");
        Ok(updated)
    }

    /// Delete a provider. Refused while it has children or allocations.
    pub fn delete_provider(&self, uuid: Uuid, generation: Generation) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            load_provider_checked(&providers, uuid, generation)?;

            for entry in providers.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let row: ResourceProvider =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if row.parent_uuid == Some(uuid) {
                    return Err(StateError::ProviderInUse(format!(
                        "provider {uuid} has child {}",
                        row.uuid
                    )));
                }
            }
            let allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            for entry in allocations.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let row: Allocation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if row.resource_provider_uuid == uuid {
                    return Err(StateError::ProviderInUse(format!(
                        "provider {uuid} has allocations"
                    )));
                }
            }

            providers
                .remove(uuid.to_string().as_str())
                .map_err(map_err!(Write))?;

            let mut inventories = txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
            let prefix = format!("{uuid}:");
            let keys: Vec<String> = {
                inventories
                    .iter()
                    .map_err(map_err!(Read))?
                    .filter_map(|entry| {
                        let (key, _) = entry.ok()?;
                        let k = key.value().to_string();
                        k.starts_with(&prefix).then_some(k)
                    })
                    .collect()
            };
            for key in &keys {
                inventories.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let mut traits = txn.open_table(PROVIDER_TRAITS).map_err(map_err!(Table))?;
            traits
                .remove(uuid.to_string().as_str())
                .map_err(map_err!(Write))?;
            let mut aggregates = txn
                .open_table(PROVIDER_AGGREGATES)
                .map_err(map_err!(Table))?;
            aggregates
                .remove(uuid.to_string().as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, "provider deleted");
        Ok(())
    }

    // ── Inventories ────────────────────────────────────────────────

    /// Replace a provider's full inventory set.
    ///
    /// Fails with `InventoryInUse` if a class with live allocations is
    /// dropped, and with `InvariantViolation` if the new capacity would
    /// fall below what is already allocated.
    pub fn put_inventories(
        &self,
        rp_uuid: Uuid,
        generation: Generation,
        inventories: &BTreeMap<String, Inventory>,
    ) -> StateResult<ResourceProvider> {
        for (resource_class, inventory) in inventories {
            names::validate_resource_class(resource_class).map_err(StateError::BadRequest)?;
            inventory
                .validate()
                .map_err(|e| StateError::BadRequest(format!("{resource_class}: {e}")))?;
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let mut provider = load_provider_checked(&providers, rp_uuid, generation)?;

            // Existing usage must still fit under the new inventory.
            let allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            let mut used_by_class: BTreeMap<String, u64> = BTreeMap::new();
            for entry in allocations.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let row: Allocation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if row.resource_provider_uuid == rp_uuid {
                    *used_by_class.entry(row.resource_class).or_insert(0) += row.used;
                }
            }
            let in_use: Vec<&String> = used_by_class
                .iter()
                .filter(|(rc, used)| **used > 0 && !inventories.contains_key(*rc))
                .map(|(rc, _)| rc)
                .collect();
            if !in_use.is_empty() {
                return Err(StateError::InventoryInUse {
                    provider: rp_uuid,
                    resource_classes: in_use
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
            for (resource_class, used) in &used_by_class {
                if let Some(inventory) = inventories.get(resource_class) {
                    if *used > inventory.capacity() {
                        return Err(StateError::InvariantViolation(format!(
                            "inventory update for {resource_class} on {rp_uuid} drops capacity \
                             to {} below current usage {used}",
                            inventory.capacity()
                        )));
                    }
                }
            }

            let mut table = txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
            let prefix = format!("{rp_uuid}:");
            let stale: Vec<String> = {
                table
                    .iter()
                    .map_err(map_err!(Read))?
                    .filter_map(|entry| {
                        let (key, _) = entry.ok()?;
                        let k = key.value().to_string();
                        k.starts_with(&prefix).then_some(k)
                    })
                    .collect()
            };
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for (resource_class, inventory) in inventories {
                table
                    .insert(
                        inventory_key(rp_uuid, resource_class).as_str(),
                        to_json(inventory)?.as_slice(),
                    )
                    .map_err(map_err!(Write))?;
            }

            provider.generation += 1;
            providers
                .insert(rp_uuid.to_string().as_str(), to_json(&provider)?.as_slice())
                .map_err(map_err!(Write))?;
            updated = provider;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%rp_uuid, classes = inventories.len(), "inventories replaced");
        Ok(updated)
    }

    /// Get a provider's inventories keyed by resource class.
    pub fn get_inventories(&self, rp_uuid: Uuid) -> StateResult<BTreeMap<String, Inventory>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
        let prefix = format!("{rp_uuid}:");
        let mut results = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if let Some(resource_class) = key.value().strip_prefix(&prefix) {
                let inventory: Inventory =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.insert(resource_class.to_string(), inventory);
            }
        }
        Ok(results)
    }

    // ── Traits ─────────────────────────────────────────────────────

    /// Replace a provider's trait set.
    pub fn set_traits(
        &self,
        rp_uuid: Uuid,
        generation: Generation,
        traits: &BTreeSet<String>,
    ) -> StateResult<ResourceProvider> {
        for name in traits {
            names::validate_trait(name).map_err(StateError::BadRequest)?;
        }
        self.replace_provider_set(rp_uuid, generation, PROVIDER_TRAITS, traits)
    }

    /// Get a provider's trait set.
    pub fn get_traits(&self, rp_uuid: Uuid) -> StateResult<BTreeSet<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDER_TRAITS).map_err(map_err!(Table))?;
        Ok(read_json(&table, &rp_uuid.to_string())?.unwrap_or_default())
    }

    // ── Aggregates ─────────────────────────────────────────────────

    /// Replace a provider's aggregate memberships.
    pub fn set_aggregates(
        &self,
        rp_uuid: Uuid,
        generation: Generation,
        aggregates: &BTreeSet<Uuid>,
    ) -> StateResult<ResourceProvider> {
        self.replace_provider_set(rp_uuid, generation, PROVIDER_AGGREGATES, aggregates)
    }

    /// Get a provider's aggregate memberships.
    pub fn get_aggregates(&self, rp_uuid: Uuid) -> StateResult<BTreeSet<Uuid>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(PROVIDER_AGGREGATES)
            .map_err(map_err!(Table))?;
        Ok(read_json(&table, &rp_uuid.to_string())?.unwrap_or_default())
    }

    /// Shared CAS-then-replace for the per-provider set tables.
    fn replace_provider_set<V: serde::Serialize>(
        &self,
        rp_uuid: Uuid,
        generation: Generation,
        definition: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        value: &V,
    ) -> StateResult<ResourceProvider> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let mut provider = load_provider_checked(&providers, rp_uuid, generation)?;
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            table
                .insert(rp_uuid.to_string().as_str(), to_json(value)?.as_slice())
                .map_err(map_err!(Write))?;
            provider.generation += 1;
            providers
                .insert(rp_uuid.to_string().as_str(), to_json(&provider)?.as_slice())
                .map_err(map_err!(Write))?;
            updated = provider;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Consumers ──────────────────────────────────────────────────

    /// Get a consumer by UUID.
    pub fn get_consumer(&self, uuid: Uuid) -> StateResult<Option<Consumer>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
        read_json(&table, &uuid.to_string())
    }

    // ── Allocations (reads; the write path lives in `alloc`) ──────

    /// All allocations held by one consumer (its bundle).
    pub fn allocations_for_consumer(&self, consumer: Uuid) -> StateResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let prefix = format!("{consumer}:");
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let allocation: Allocation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(allocation);
            }
        }
        Ok(results)
    }

    /// All allocations drawn from one provider.
    pub fn allocations_for_provider(&self, rp_uuid: Uuid) -> StateResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let allocation: Allocation =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if allocation.resource_provider_uuid == rp_uuid {
                results.push(allocation);
            }
        }
        Ok(results)
    }

    /// Summed usage per resource class on one provider.
    pub fn usage_for_provider(&self, rp_uuid: Uuid) -> StateResult<BTreeMap<String, u64>> {
        let mut usage = BTreeMap::new();
        for allocation in self.allocations_for_provider(rp_uuid)? {
            *usage.entry(allocation.resource_class).or_insert(0) += allocation.used;
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{BundleWrite, ProviderClaim};

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn vcpu_inventory(total: u64) -> BTreeMap<String, Inventory> {
        let mut map = BTreeMap::new();
        map.insert(
            "VCPU".to_string(),
            Inventory {
                total,
                ..Inventory::default()
            },
        );
        map
    }

    // ── Provider CRUD ──────────────────────────────────────────────

    #[test]
    fn provider_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_provider(uuid(1), "cn0", None).unwrap();

        assert_eq!(created.generation, 0);
        assert_eq!(created.root_uuid, uuid(1));
        assert!(created.is_root());

        let fetched = store.get_provider(uuid(1)).unwrap();
        assert_eq!(fetched, Some(created));
    }

    #[test]
    fn child_inherits_root() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        let numa = store.create_provider(uuid(2), "numa0", Some(uuid(1))).unwrap();
        let fpga = store.create_provider(uuid(3), "fpga0", Some(uuid(2))).unwrap();

        assert_eq!(numa.root_uuid, uuid(1));
        assert_eq!(fpga.root_uuid, uuid(1));
        assert_eq!(fpga.parent_uuid, Some(uuid(2)));
    }

    #[test]
    fn duplicate_uuid_and_name_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();

        assert!(matches!(
            store.create_provider(uuid(1), "other", None),
            Err(StateError::Exists(_))
        ));
        assert!(matches!(
            store.create_provider(uuid(2), "cn0", None),
            Err(StateError::Exists(_))
        ));
    }

    #[test]
    fn missing_parent_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.create_provider(uuid(1), "numa0", Some(uuid(9))),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn list_providers_sorted_by_uuid() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(3), "c", None).unwrap();
        store.create_provider(uuid(1), "a", None).unwrap();
        store.create_provider(uuid(2), "b", None).unwrap();

        let uuids: Vec<Uuid> = store.list_providers().unwrap().iter().map(|p| p.uuid).collect();
        assert_eq!(uuids, vec![uuid(1), uuid(2), uuid(3)]);
    }

    // ── Reparenting ────────────────────────────────────────────────

    #[test]
    fn reparent_within_tree_updates_subtree_roots() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.create_provider(uuid(2), "numa0", Some(uuid(1))).unwrap();
        store.create_provider(uuid(3), "numa1", Some(uuid(1))).unwrap();
        store.create_provider(uuid(4), "nic", Some(uuid(2))).unwrap();

        // Move the NIC from numa0 to numa1.
        let moved = store.reparent_provider(uuid(4), 0, Some(uuid(3))).unwrap();
        assert_eq!(moved.parent_uuid, Some(uuid(3)));
        assert_eq!(moved.root_uuid, uuid(1));
        assert_eq!(moved.generation, 1);
    }

    #[test]
    fn detach_to_root_rewrites_descendants() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.create_provider(uuid(2), "numa0", Some(uuid(1))).unwrap();
        store.create_provider(uuid(3), "fpga0", Some(uuid(2))).unwrap();

        let detached = store.reparent_provider(uuid(2), 0, None).unwrap();
        assert!(detached.is_root());
        assert_eq!(detached.root_uuid, uuid(2));

        // The grandchild's denormalized root followed in the same commit.
        let fpga = store.get_provider(uuid(3)).unwrap().unwrap();
        assert_eq!(fpga.root_uuid, uuid(2));
        assert_eq!(fpga.parent_uuid, Some(uuid(2)));
    }

    #[test]
    fn reparent_rejects_cycles_and_cross_tree_moves() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.create_provider(uuid(2), "numa0", Some(uuid(1))).unwrap();
        store.create_provider(uuid(3), "fpga0", Some(uuid(2))).unwrap();
        store.create_provider(uuid(9), "cn1", None).unwrap();

        // numa0 under its own descendant.
        assert!(matches!(
            store.reparent_provider(uuid(2), 0, Some(uuid(3))),
            Err(StateError::BadRequest(_))
        ));
        // numa0 into a different tree.
        assert!(matches!(
            store.reparent_provider(uuid(2), 0, Some(uuid(9))),
            Err(StateError::BadRequest(_))
        ));
        // Self-parenting.
        assert!(matches!(
            store.reparent_provider(uuid(2), 0, Some(uuid(2))),
            Err(StateError::BadRequest(_))
        ));
    }

    #[test]
    fn reparent_with_stale_generation_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.create_provider(uuid(2), "numa0", Some(uuid(1))).unwrap();
        store.set_traits(uuid(2), 0, &BTreeSet::new()).unwrap(); // bumps to 1

        assert!(matches!(
            store.reparent_provider(uuid(2), 0, None),
            Err(StateError::Conflict(_))
        ));
    }

    // ── Deletion guards ────────────────────────────────────────────

    #[test]
    fn delete_leaf_provider_removes_satellite_rows() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        let after_inv = store.put_inventories(uuid(1), 0, &vcpu_inventory(4)).unwrap();
        let mut traits = BTreeSet::new();
        traits.insert("CUSTOM_FOO".to_string());
        let after_traits = store
            .set_traits(uuid(1), after_inv.generation, &traits)
            .unwrap();

        store.delete_provider(uuid(1), after_traits.generation).unwrap();

        assert!(store.get_provider(uuid(1)).unwrap().is_none());
        assert!(store.get_inventories(uuid(1)).unwrap().is_empty());
        assert!(store.get_traits(uuid(1)).unwrap().is_empty());
    }

    #[test]
    fn delete_with_children_refused() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.create_provider(uuid(2), "numa0", Some(uuid(1))).unwrap();

        assert!(matches!(
            store.delete_provider(uuid(1), 0),
            Err(StateError::ProviderInUse(_))
        ));
    }

    #[test]
    fn delete_with_allocations_refused() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.put_inventories(uuid(1), 0, &vcpu_inventory(4)).unwrap();

        let mut resources = BTreeMap::new();
        resources.insert("VCPU".to_string(), 1);
        let mut allocations = BTreeMap::new();
        allocations.insert(
            uuid(1),
            ProviderClaim {
                generation: None,
                resources,
            },
        );
        store
            .replace_allocations(&BundleWrite {
                consumer_uuid: uuid(0xc1),
                project_id: "p".to_string(),
                user_id: "u".to_string(),
                consumer_generation: None,
                allocations,
                mappings: BTreeMap::new(),
            })
            .unwrap();

        let generation = store.get_provider(uuid(1)).unwrap().unwrap().generation;
        assert!(matches!(
            store.delete_provider(uuid(1), generation),
            Err(StateError::ProviderInUse(_))
        ));
    }

    // ── Inventories ────────────────────────────────────────────────

    #[test]
    fn put_inventories_bumps_generation() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();

        let updated = store.put_inventories(uuid(1), 0, &vcpu_inventory(8)).unwrap();
        assert_eq!(updated.generation, 1);

        let inventories = store.get_inventories(uuid(1)).unwrap();
        assert_eq!(inventories.get("VCPU").unwrap().total, 8);
    }

    #[test]
    fn put_inventories_with_stale_generation_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.put_inventories(uuid(1), 0, &vcpu_inventory(8)).unwrap();

        assert!(matches!(
            store.put_inventories(uuid(1), 0, &vcpu_inventory(16)),
            Err(StateError::Conflict(_))
        ));
    }

    #[test]
    fn invalid_inventory_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();

        let mut bad = BTreeMap::new();
        bad.insert(
            "VCPU".to_string(),
            Inventory {
                total: 4,
                reserved: 5,
                ..Inventory::default()
            },
        );
        assert!(matches!(
            store.put_inventories(uuid(1), 0, &bad),
            Err(StateError::BadRequest(_))
        ));

        let mut bad_name = BTreeMap::new();
        bad_name.insert("vcpu".to_string(), Inventory::default());
        assert!(matches!(
            store.put_inventories(uuid(1), 0, &bad_name),
            Err(StateError::BadRequest(_))
        ));
    }

    #[test]
    fn dropping_allocated_class_is_inventory_in_use() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();
        store.put_inventories(uuid(1), 0, &vcpu_inventory(8)).unwrap();

        let mut resources = BTreeMap::new();
        resources.insert("VCPU".to_string(), 2);
        let mut allocations = BTreeMap::new();
        allocations.insert(
            uuid(1),
            ProviderClaim {
                generation: None,
                resources,
            },
        );
        store
            .replace_allocations(&BundleWrite {
                consumer_uuid: uuid(0xc1),
                project_id: "p".to_string(),
                user_id: "u".to_string(),
                consumer_generation: None,
                allocations,
                mappings: BTreeMap::new(),
            })
            .unwrap();

        let generation = store.get_provider(uuid(1)).unwrap().unwrap().generation;
        let mut replacement = BTreeMap::new();
        replacement.insert("MEMORY_MB".to_string(), Inventory {
            total: 1024,
            ..Inventory::default()
        });
        let err = store
            .put_inventories(uuid(1), generation, &replacement)
            .unwrap_err();
        assert!(matches!(err, StateError::InventoryInUse { .. }));
        assert_eq!(err.code(), "placement.inventory.inuse");

        // Shrinking below current usage is an invariant violation.
        let err = store
            .put_inventories(uuid(1), generation, &vcpu_inventory(1))
            .unwrap_err();
        assert!(matches!(err, StateError::InvariantViolation(_)));
    }

    // ── Traits & aggregates ────────────────────────────────────────

    #[test]
    fn traits_round_trip_and_bump() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();

        let mut traits = BTreeSet::new();
        traits.insert("HW_CPU_X86_AVX2".to_string());
        traits.insert("CUSTOM_FPGA".to_string());
        let updated = store.set_traits(uuid(1), 0, &traits).unwrap();

        assert_eq!(updated.generation, 1);
        assert_eq!(store.get_traits(uuid(1)).unwrap(), traits);
    }

    #[test]
    fn malformed_trait_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();

        let mut traits = BTreeSet::new();
        traits.insert("not-a-trait".to_string());
        assert!(matches!(
            store.set_traits(uuid(1), 0, &traits),
            Err(StateError::BadRequest(_))
        ));
    }

    #[test]
    fn aggregates_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_provider(uuid(1), "cn0", None).unwrap();

        let mut aggregates = BTreeSet::new();
        aggregates.insert(uuid(0xa99a));
        store.set_aggregates(uuid(1), 0, &aggregates).unwrap();

        assert_eq!(store.get_aggregates(uuid(1)).unwrap(), aggregates);
        // Absent rows read back as the empty set.
        assert!(store.get_aggregates(uuid(2)).unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create_provider(uuid(1), "cn0", None).unwrap();
            store.put_inventories(uuid(1), 0, &vcpu_inventory(8)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let provider = store.get_provider(uuid(1)).unwrap().unwrap();
        assert_eq!(provider.name, "cn0");
        assert_eq!(provider.generation, 1);
        assert_eq!(store.get_inventories(uuid(1)).unwrap().len(), 1);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_providers().unwrap().is_empty());
        assert!(store.get_provider(uuid(1)).unwrap().is_none());
        assert!(store.get_inventories(uuid(1)).unwrap().is_empty());
        assert!(store.get_traits(uuid(1)).unwrap().is_empty());
        assert!(store.get_consumer(uuid(1)).unwrap().is_none());
        assert!(store.allocations_for_provider(uuid(1)).unwrap().is_empty());
    }
}
