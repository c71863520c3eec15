//! Per-group match enumeration.
//!
//! A *match* assigns every resource class of one group to exactly one
//! provider; different classes may land on different providers within the
//! same tree. Resourceless groups match any single provider passing their
//! filters.
//!
//! Order is load-bearing for reproducibility: resource classes iterate in
//! lexicographic order, providers within a class ascend by UUID, and
//! trees ascend by root UUID.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use uuid::Uuid;

use crate::capacity::CapacityView;
use crate::error::{CandidateResult, Deadline};
use crate::filter::ProviderIndex;
use crate::forest::ProviderForest;
use crate::request::RequestGroup;

/// One way to satisfy a single group within one provider tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMatch {
    /// Root of the tree every assigned provider belongs to.
    pub root: Uuid,
    /// `resource class → (provider, amount)`; empty for resourceless groups.
    pub assignments: BTreeMap<String, (Uuid, u64)>,
    /// Distinct providers used by this match.
    pub providers: BTreeSet<Uuid>,
}

/// Enumerate all matches for one group, in stable order.
pub fn match_group(
    group: &RequestGroup,
    forest: &ProviderForest,
    index: &ProviderIndex,
    view: &CapacityView,
    deadline: &Deadline,
) -> CandidateResult<Vec<GroupMatch>> {
    let allowed = index.matching(&group.traits, &group.aggregates);
    if allowed.is_empty() {
        return Ok(Vec::new());
    }

    if group.is_resourceless() {
        // Any single filtered provider will do; it only anchors locality.
        let matches = allowed
            .iter()
            .filter_map(|&rp| {
                let root = forest.root_of(rp)?;
                Some(GroupMatch {
                    root,
                    assignments: BTreeMap::new(),
                    providers: BTreeSet::from([rp]),
                })
            })
            .collect();
        return Ok(matches);
    }

    // Per tree, per resource class: the providers that can supply the
    // requested amount and pass the group's filters.
    let mut per_root: BTreeMap<Uuid, BTreeMap<&str, Vec<Uuid>>> = BTreeMap::new();
    for (resource_class, &amount) in &group.resources {
        for rp in view.providers_for(resource_class, amount) {
            if !allowed.contains(&rp) {
                continue;
            }
            let Some(root) = forest.root_of(rp) else {
                continue;
            };
            per_root
                .entry(root)
                .or_default()
                .entry(resource_class.as_str())
                .or_default()
                .push(rp);
        }
    }

    let class_count = group.resources.len();
    let mut matches = Vec::new();
    for (root, by_class) in &per_root {
        if by_class.len() != class_count {
            // Some class has no viable provider in this tree.
            continue;
        }
        let classes: Vec<(&str, u64, &Vec<Uuid>)> = group
            .resources
            .iter()
            .map(|(resource_class, &amount)| {
                (
                    resource_class.as_str(),
                    amount,
                    &by_class[resource_class.as_str()],
                )
            })
            .collect();

        // Odometer over the per-class provider lists, rightmost fastest.
        let mut cursor = vec![0usize; classes.len()];
        'product: loop {
            deadline.check()?;
            let mut assignments = BTreeMap::new();
            let mut providers = BTreeSet::new();
            for (slot, &(resource_class, amount, candidates)) in classes.iter().enumerate() {
                let rp = candidates[cursor[slot]];
                assignments.insert(resource_class.to_string(), (rp, amount));
                providers.insert(rp);
            }
            matches.push(GroupMatch {
                root: *root,
                assignments,
                providers,
            });

            for slot in (0..classes.len()).rev() {
                cursor[slot] += 1;
                if cursor[slot] < classes[slot].2.len() {
                    continue 'product;
                }
                cursor[slot] = 0;
            }
            break;
        }
    }

    debug!(
        suffix = %group.suffix,
        matches = matches.len(),
        trees = per_root.len(),
        "group matched"
    );
    Ok(matches)
}
