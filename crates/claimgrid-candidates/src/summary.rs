//! Provider summaries for the response body.
//!
//! Summaries cover every provider in every tree referenced by the emitted
//! allocation requests, including providers that contributed no inventory
//! themselves (their tree-mates did).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use claimgrid_state::Snapshot;

use crate::combiner::AllocationRequest;
use crate::forest::ProviderForest;

/// Capacity and current usage for one resource class on one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResource {
    pub capacity: u64,
    pub used: u64,
}

/// Usage, trait, and topology summary for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub resources: BTreeMap<String, SummaryResource>,
    pub traits: Vec<String>,
    pub parent_provider_uuid: Option<Uuid>,
    pub root_provider_uuid: Uuid,
}

/// Build summaries for the trees the candidates touch.
pub fn build_summaries(
    snapshot: &Snapshot,
    forest: &ProviderForest,
    requests: &[AllocationRequest],
) -> BTreeMap<Uuid, ProviderSummary> {
    let mut roots: std::collections::BTreeSet<Uuid> = std::collections::BTreeSet::new();
    for request in requests {
        // Mappings name every provider a group chose, including the
        // resourceless anchors that hold no allocation.
        for providers in request.mappings.values() {
            for &rp in providers {
                if let Some(root) = forest.root_of(rp) {
                    roots.insert(root);
                }
            }
        }
        for &rp in request.allocations.keys() {
            if let Some(root) = forest.root_of(rp) {
                roots.insert(root);
            }
        }
    }

    let mut summaries = BTreeMap::new();
    for provider in &snapshot.providers {
        if !roots.contains(&provider.root_uuid) {
            continue;
        }
        let mut resources = BTreeMap::new();
        for ((rp, resource_class), inventory) in &snapshot.inventories {
            if *rp == provider.uuid {
                resources.insert(
                    resource_class.clone(),
                    SummaryResource {
                        capacity: inventory.capacity(),
                        used: snapshot.usage(*rp, resource_class),
                    },
                );
            }
        }
        let traits = snapshot
            .traits_of(provider.uuid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        summaries.insert(
            provider.uuid,
            ProviderSummary {
                resources,
                traits,
                parent_provider_uuid: provider.parent_uuid,
                root_provider_uuid: provider.root_uuid,
            },
        );
    }
    summaries
}
