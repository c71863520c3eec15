//! The allocation write path.
//!
//! Bundle semantics: the full set of a consumer's allocations is replaced
//! atomically. `replace_allocations` handles one consumer (PUT),
//! `swap_allocations` rewrites several consumers in one commit (POST), and
//! `clear_allocations` empties a bundle (DELETE). All three run the same
//! contract in a single redb write transaction:
//!
//! 1. consumer generation CAS (when the caller supplied one),
//! 2. net-delta capacity check per `(provider, resource class)`,
//! 3. provider generation CAS (when supplied),
//! 4. apply, bumping each touched consumer and provider exactly once.
//!
//! The candidate solver's output is advisory; this module is where
//! correctness is re-established.

use std::collections::{BTreeMap, BTreeSet};

use redb::ReadableTable;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::store::{load_provider_checked, map_err, read_json, to_json, StateStore};
use crate::tables::*;
use crate::types::*;

/// One provider's share of a requested bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderClaim {
    /// Provider generation the caller observed. When present the write
    /// CASes against it; when absent, concurrent provider changes are
    /// tolerated as long as capacity still holds.
    pub generation: Option<Generation>,
    /// Requested amounts keyed by resource class. Amounts must be positive.
    pub resources: BTreeMap<String, u64>,
}

/// A full replacement of one consumer's allocation bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleWrite {
    pub consumer_uuid: Uuid,
    pub project_id: String,
    pub user_id: String,
    /// Generation the caller observed, or `None` for a consumer the caller
    /// believes does not exist yet.
    pub consumer_generation: Option<Generation>,
    /// The new bundle; empty means "remove all allocations and the consumer".
    pub allocations: BTreeMap<Uuid, ProviderClaim>,
    /// Advisory suffix → providers mapping carried over from the selected
    /// allocation request. Stored nowhere; not interpreted by the writer.
    pub mappings: BTreeMap<String, Vec<Uuid>>,
}

impl StateStore {
    /// Replace one consumer's bundle (PUT semantics).
    pub fn replace_allocations(&self, write: &BundleWrite) -> StateResult<()> {
        self.apply_bundle_writes(std::slice::from_ref(write))
    }

    /// Replace several consumers' bundles in one commit (POST semantics).
    pub fn swap_allocations(&self, writes: &[BundleWrite]) -> StateResult<()> {
        self.apply_bundle_writes(writes)
    }

    /// Empty one consumer's bundle and drop the consumer (DELETE semantics).
    pub fn clear_allocations(
        &self,
        consumer_uuid: Uuid,
        consumer_generation: Option<Generation>,
    ) -> StateResult<()> {
        let consumer = self
            .get_consumer(consumer_uuid)?
            .ok_or_else(|| StateError::NotFound(format!("consumer {consumer_uuid}")))?;
        self.apply_bundle_writes(&[BundleWrite {
            consumer_uuid,
            project_id: consumer.project_id,
            user_id: consumer.user_id,
            consumer_generation,
            allocations: BTreeMap::new(),
            mappings: BTreeMap::new(),
        }])
    }

    /// The shared transactional write path. See module docs for the contract.
    fn apply_bundle_writes(&self, writes: &[BundleWrite]) -> StateResult<()> {
        // Fail fast on malformed payloads before opening a transaction.
        let mut seen = BTreeSet::new();
        for write in writes {
            if !seen.insert(write.consumer_uuid) {
                return Err(StateError::BadRequest(format!(
                    "consumer {} appears twice in one request",
                    write.consumer_uuid
                )));
            }
            for (rp, claim) in &write.allocations {
                if claim.resources.is_empty() {
                    return Err(StateError::BadRequest(format!(
                        "empty resources for provider {rp}"
                    )));
                }
                for (resource_class, amount) in &claim.resources {
                    if *amount == 0 {
                        return Err(StateError::BadRequest(format!(
                            "zero allocation of {resource_class} on provider {rp}"
                        )));
                    }
                }
            }
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let mut consumers = txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
            let inventories = txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
            let mut allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;

            // (1) Consumer generation checks.
            let written: BTreeSet<Uuid> = writes.iter().map(|w| w.consumer_uuid).collect();
            let mut existing_consumers: BTreeMap<Uuid, Consumer> = BTreeMap::new();
            for write in writes {
                let uuid = write.consumer_uuid;
                match read_json::<Consumer>(&consumers, &uuid.to_string())? {
                    Some(consumer) => {
                        if let Some(expected) = write.consumer_generation {
                            if consumer.generation != expected {
                                return Err(StateError::Conflict(format!(
                                    "consumer {uuid}: expected generation {expected}, found {}",
                                    consumer.generation
                                )));
                            }
                        }
                        existing_consumers.insert(uuid, consumer);
                    }
                    None => {
                        if let Some(expected) = write.consumer_generation {
                            return Err(StateError::Conflict(format!(
                                "consumer {uuid} does not exist but generation {expected} \
                                 was supplied"
                            )));
                        }
                        if write.allocations.is_empty() {
                            return Err(StateError::NotFound(format!("consumer {uuid}")));
                        }
                    }
                }
            }

            // Current rows: everything for usage sums, split out the rows
            // belonging to the consumers being rewritten.
            let mut total_used: BTreeMap<(Uuid, String), u64> = BTreeMap::new();
            let mut old_contrib: BTreeMap<(Uuid, String), u64> = BTreeMap::new();
            let mut old_keys: Vec<String> = Vec::new();
            for entry in allocations.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let row: Allocation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                let slot = (row.resource_provider_uuid, row.resource_class.clone());
                *total_used.entry(slot.clone()).or_insert(0) += row.used;
                if written.contains(&row.consumer_uuid) {
                    *old_contrib.entry(slot).or_insert(0) += row.used;
                    old_keys.push(key.value().to_string());
                }
            }

            // (2) Net delta and capacity assertion per (provider, class).
            let mut new_contrib: BTreeMap<(Uuid, String), u64> = BTreeMap::new();
            for write in writes {
                for (rp, claim) in &write.allocations {
                    for (resource_class, amount) in &claim.resources {
                        *new_contrib
                            .entry((*rp, resource_class.clone()))
                            .or_insert(0) += amount;
                    }
                }
            }
            for ((rp, resource_class), requested) in &new_contrib {
                let inventory: Inventory =
                    read_json(&inventories, &inventory_key(*rp, resource_class))?.ok_or_else(
                        || {
                            StateError::NotFound(format!(
                                "no inventory of class {resource_class} on provider {rp}"
                            ))
                        },
                    )?;
                let before = total_used.get(&(*rp, resource_class.clone())).copied().unwrap_or(0);
                let freed = old_contrib.get(&(*rp, resource_class.clone())).copied().unwrap_or(0);
                let after = before - freed + requested;
                if after > inventory.capacity() {
                    warn!(
                        provider = %rp,
                        resource_class = %resource_class,
                        after,
                        capacity = inventory.capacity(),
                        "allocation rejected: capacity exceeded"
                    );
                    return Err(StateError::CapacityExceeded {
                        provider: *rp,
                        resource_class: resource_class.clone(),
                    });
                }
            }
            // Per-row unit constraints.
            for write in writes {
                for (rp, claim) in &write.allocations {
                    for (resource_class, amount) in &claim.resources {
                        let inventory: Inventory =
                            read_json(&inventories, &inventory_key(*rp, resource_class))?
                                .ok_or_else(|| {
                                    StateError::NotFound(format!(
                                        "no inventory of class {resource_class} on provider {rp}"
                                    ))
                                })?;
                        if !inventory.unit_constraints_hold(*amount) {
                            return Err(StateError::ConstraintViolated {
                                provider: *rp,
                                resource_class: resource_class.clone(),
                            });
                        }
                    }
                }
            }

            // (3) Provider existence + generation CAS when supplied; every
            // provider appearing in an old or new bundle is "touched" and
            // gets exactly one generation bump in step (4).
            let mut touched: BTreeSet<Uuid> = BTreeSet::new();
            for (rp, _) in old_contrib.keys() {
                touched.insert(*rp);
            }
            for write in writes {
                for (rp, claim) in &write.allocations {
                    touched.insert(*rp);
                    if let Some(expected) = claim.generation {
                        load_provider_checked(&providers, *rp, expected)?;
                    } else if read_json::<ResourceProvider>(&providers, &rp.to_string())?
                        .is_none()
                    {
                        return Err(StateError::NotFound(format!("resource provider {rp}")));
                    }
                }
            }

            // (4) Apply: drop old rows, insert new bundles, bump generations.
            for key in &old_keys {
                allocations.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for write in writes {
                for (rp, claim) in &write.allocations {
                    for (resource_class, amount) in &claim.resources {
                        let row = Allocation {
                            consumer_uuid: write.consumer_uuid,
                            resource_provider_uuid: *rp,
                            resource_class: resource_class.clone(),
                            used: *amount,
                        };
                        allocations
                            .insert(row.table_key().as_str(), to_json(&row)?.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                }
            }
            for write in writes {
                let uuid = write.consumer_uuid;
                if write.allocations.is_empty() {
                    consumers
                        .remove(uuid.to_string().as_str())
                        .map_err(map_err!(Write))?;
                    debug!(consumer = %uuid, "bundle emptied, consumer removed");
                    continue;
                }
                let generation = match existing_consumers.get(&uuid) {
                    Some(consumer) => consumer.generation + 1,
                    None => 1,
                };
                let record = Consumer {
                    uuid,
                    project_id: write.project_id.clone(),
                    user_id: write.user_id.clone(),
                    generation,
                };
                consumers
                    .insert(uuid.to_string().as_str(), to_json(&record)?.as_slice())
                    .map_err(map_err!(Write))?;
            }
            for rp in &touched {
                let mut provider: ResourceProvider =
                    read_json(&providers, &rp.to_string())?.ok_or_else(|| {
                        StateError::NotFound(format!("resource provider {rp}"))
                    })?;
                provider.generation += 1;
                providers
                    .insert(rp.to_string().as_str(), to_json(&provider)?.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(consumers = writes.len(), "allocation bundles applied");
        Ok(())
    }
}
