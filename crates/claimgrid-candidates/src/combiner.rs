//! Cross-group candidate composition.
//!
//! Per-group matches are bucketed by tree root; combinations are drawn
//! only within a root, so every emitted candidate trivially satisfies the
//! whole-request locality rule. Within a root the Cartesian product of
//! per-group matches is walked, rejecting combinations that violate
//! `group_policy` or any `same_subtree` clause, then consolidated (amounts
//! for the same provider and class are summed), capacity-rechecked, and
//! deduplicated.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use claimgrid_state::Snapshot;

use crate::error::{CandidateResult, Deadline};
use crate::forest::ProviderForest;
use crate::matcher::GroupMatch;
use crate::request::{CandidateRequest, GroupPolicy};

/// Consolidated amounts one candidate draws from one provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestedAllocations {
    pub resources: BTreeMap<String, u64>,
}

/// One candidate the client can attempt to claim.
///
/// Two candidates are equal iff their `(allocations, mappings)` pairs are
/// equal; `mappings` preserves which group chose which providers even when
/// several groups land on the same provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub allocations: BTreeMap<Uuid, RequestedAllocations>,
    pub mappings: BTreeMap<String, Vec<Uuid>>,
}

/// Compose per-group match sequences into deduplicated candidates.
pub fn combine(
    request: &CandidateRequest,
    matches: &BTreeMap<String, Vec<GroupMatch>>,
    snapshot: &Snapshot,
    forest: &ProviderForest,
    deadline: &Deadline,
) -> CandidateResult<Vec<AllocationRequest>> {
    // Bucket every group's matches by tree root. A root is viable only if
    // every group has at least one match there.
    let mut by_root: BTreeMap<Uuid, BTreeMap<&str, Vec<&GroupMatch>>> = BTreeMap::new();
    for (suffix, group_matches) in matches {
        for group_match in group_matches {
            by_root
                .entry(group_match.root)
                .or_default()
                .entry(suffix.as_str())
                .or_default()
                .push(group_match);
        }
    }

    let group_count = matches.len();
    let mut accepted: BTreeSet<AllocationRequest> = BTreeSet::new();
    for (root, groups_here) in &by_root {
        if groups_here.len() != group_count {
            trace!(%root, "tree lacks matches for some group, skipped");
            continue;
        }
        let lists: Vec<&Vec<&GroupMatch>> = groups_here.values().collect();
        let suffixes: Vec<&str> = groups_here.keys().copied().collect();

        let mut cursor = vec![0usize; lists.len()];
        'product: loop {
            deadline.check()?;
            let combo: Vec<&GroupMatch> = cursor
                .iter()
                .enumerate()
                .map(|(slot, &at)| lists[slot][at])
                .collect();

            if satisfies_group_policy(request, &suffixes, &combo)
                && satisfies_same_subtree(request, &suffixes, &combo, forest)
            {
                let candidate = consolidate(&suffixes, &combo);
                if exceeds_capacity(&candidate, snapshot) {
                    trace!(%root, "combination exceeds consolidated capacity, dropped");
                } else {
                    accepted.insert(candidate);
                }
            }

            for slot in (0..lists.len()).rev() {
                cursor[slot] += 1;
                if cursor[slot] < lists[slot].len() {
                    continue 'product;
                }
                cursor[slot] = 0;
            }
            break;
        }
    }

    debug!(candidates = accepted.len(), "combination finished");
    Ok(accepted.into_iter().collect())
}

/// `isolate` demands pairwise-disjoint providers across resourceful
/// groups; resourceless groups may share providers with anyone.
fn satisfies_group_policy(
    request: &CandidateRequest,
    suffixes: &[&str],
    combo: &[&GroupMatch],
) -> bool {
    if request.policy() != GroupPolicy::Isolate {
        return true;
    }
    let mut seen: BTreeSet<Uuid> = BTreeSet::new();
    for (slot, group_match) in combo.iter().enumerate() {
        if group_match.assignments.is_empty() {
            continue; // resourceless groups are exempt
        }
        for &rp in &group_match.providers {
            if !seen.insert(rp) {
                trace!(suffix = suffixes[slot], provider = %rp, "isolate violated");
                return false;
            }
        }
    }
    true
}

/// Every `same_subtree` clause must see its groups' providers share a
/// subtree anchored at one of those providers.
fn satisfies_same_subtree(
    request: &CandidateRequest,
    suffixes: &[&str],
    combo: &[&GroupMatch],
    forest: &ProviderForest,
) -> bool {
    for clause in &request.same_subtree {
        let mut providers: BTreeSet<Uuid> = BTreeSet::new();
        for (slot, group_match) in combo.iter().enumerate() {
            if clause.contains(suffixes[slot]) {
                providers.extend(&group_match.providers);
            }
        }
        if !forest.same_subtree(&providers) {
            return false;
        }
    }
    true
}

/// Merge one match per group into a single candidate, summing amounts
/// drawn from the same `(provider, class)`.
fn consolidate(suffixes: &[&str], combo: &[&GroupMatch]) -> AllocationRequest {
    let mut allocations: BTreeMap<Uuid, RequestedAllocations> = BTreeMap::new();
    let mut mappings: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
    for (slot, group_match) in combo.iter().enumerate() {
        for (resource_class, &(rp, amount)) in &group_match.assignments {
            *allocations
                .entry(rp)
                .or_insert_with(|| RequestedAllocations {
                    resources: BTreeMap::new(),
                })
                .resources
                .entry(resource_class.clone())
                .or_insert(0) += amount;
        }
        mappings.insert(
            suffixes[slot].to_string(),
            group_match.providers.iter().copied().collect(),
        );
    }
    AllocationRequest {
        allocations,
        mappings,
    }
}

/// Consolidation can push a provider past its capacity or `max_unit`
/// where groups overlapped; such candidates are dropped.
fn exceeds_capacity(candidate: &AllocationRequest, snapshot: &Snapshot) -> bool {
    for (rp, requested) in &candidate.allocations {
        for (resource_class, &amount) in &requested.resources {
            let Some(inventory) = snapshot.inventory(*rp, resource_class) else {
                return true;
            };
            if snapshot.usage(*rp, resource_class) + amount > inventory.capacity()
                || amount > inventory.max_unit
            {
                return true;
            }
        }
    }
    false
}
