//! Trait and aggregate filtering over inverted indexes.
//!
//! The indexes (trait → providers, aggregate → providers) are built once
//! per snapshot; evaluating a filter is then set algebra, starting from
//! the smallest positive clause so cost tracks the most selective term.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use claimgrid_state::Snapshot;

use crate::request::{AggregateFilter, TraitFilter};

/// Inverted provider indexes for one snapshot.
#[derive(Debug, Default)]
pub struct ProviderIndex {
    by_trait: HashMap<String, BTreeSet<Uuid>>,
    by_aggregate: HashMap<Uuid, BTreeSet<Uuid>>,
    all: BTreeSet<Uuid>,
}

impl ProviderIndex {
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut index = Self::default();
        for provider in &snapshot.providers {
            index.all.insert(provider.uuid);
        }
        for (rp, traits) in &snapshot.traits {
            for name in traits {
                index.by_trait.entry(name.clone()).or_default().insert(*rp);
            }
        }
        for (rp, aggregates) in &snapshot.aggregates {
            for aggregate in aggregates {
                index
                    .by_aggregate
                    .entry(*aggregate)
                    .or_default()
                    .insert(*rp);
            }
        }
        index
    }

    /// Providers carrying `name`.
    fn with_trait(&self, name: &str) -> BTreeSet<Uuid> {
        self.by_trait.get(name).cloned().unwrap_or_default()
    }

    /// Providers in `aggregate`.
    fn in_aggregate(&self, aggregate: Uuid) -> BTreeSet<Uuid> {
        self.by_aggregate.get(&aggregate).cloned().unwrap_or_default()
    }

    /// Providers satisfying every clause of both filters.
    pub fn matching(&self, traits: &TraitFilter, aggregates: &AggregateFilter) -> BTreeSet<Uuid> {
        // Gather positive clauses as provider sets: one per required trait,
        // one per any-of group, one per member_of OR-group.
        let mut clauses: Vec<BTreeSet<Uuid>> = Vec::new();
        for name in &traits.required {
            clauses.push(self.with_trait(name));
        }
        for any_of in &traits.any_of {
            let mut union = BTreeSet::new();
            for name in any_of {
                union.extend(self.with_trait(name));
            }
            clauses.push(union);
        }
        for or_group in &aggregates.member_of {
            let mut union = BTreeSet::new();
            for aggregate in or_group {
                union.extend(self.in_aggregate(*aggregate));
            }
            clauses.push(union);
        }

        // Intersect smallest-first; with no positive clause, start from all.
        clauses.sort_by_key(|c| c.len());
        let mut result = match clauses.first() {
            Some(first) => first.clone(),
            None => self.all.clone(),
        };
        for clause in clauses.iter().skip(1) {
            result.retain(|rp| clause.contains(rp));
            if result.is_empty() {
                return result;
            }
        }

        for name in &traits.forbidden {
            let carrying = self.with_trait(name);
            result.retain(|rp| !carrying.contains(rp));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use claimgrid_state::ResourceProvider;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn snapshot() -> Snapshot {
        let providers = (1..=4u128)
            .map(|n| ResourceProvider {
                uuid: uuid(n),
                name: format!("rp-{n}"),
                parent_uuid: None,
                root_uuid: uuid(n),
                generation: 0,
            })
            .collect();
        let mut traits: BTreeMap<Uuid, BTreeSet<String>> = BTreeMap::new();
        traits.insert(uuid(1), ["CUSTOM_SSD", "CUSTOM_FAST"].map(String::from).into_iter().collect());
        traits.insert(uuid(2), ["CUSTOM_SSD"].map(String::from).into_iter().collect());
        traits.insert(uuid(3), ["CUSTOM_HDD", "CUSTOM_FAST"].map(String::from).into_iter().collect());

        let mut aggregates: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        aggregates.insert(uuid(1), BTreeSet::from([uuid(0xa1)]));
        aggregates.insert(uuid(2), BTreeSet::from([uuid(0xa1), uuid(0xa2)]));
        aggregates.insert(uuid(4), BTreeSet::from([uuid(0xa2)]));

        Snapshot {
            providers,
            traits,
            aggregates,
            ..Snapshot::default()
        }
    }

    fn filter_traits(
        required: &[&str],
        forbidden: &[&str],
        any_of: &[&[&str]],
    ) -> TraitFilter {
        TraitFilter {
            required: required.iter().map(|s| s.to_string()).collect(),
            forbidden: forbidden.iter().map(|s| s.to_string()).collect(),
            any_of: any_of
                .iter()
                .map(|group| group.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let index = ProviderIndex::build(&snapshot());
        let matched = index.matching(&TraitFilter::default(), &AggregateFilter::default());
        assert_eq!(matched.len(), 4);
    }

    #[test]
    fn required_is_and_over_presence() {
        let index = ProviderIndex::build(&snapshot());
        let matched = index.matching(
            &filter_traits(&["CUSTOM_SSD", "CUSTOM_FAST"], &[], &[]),
            &AggregateFilter::default(),
        );
        assert_eq!(matched, BTreeSet::from([uuid(1)]));
    }

    #[test]
    fn forbidden_is_and_over_absence() {
        let index = ProviderIndex::build(&snapshot());
        let matched = index.matching(
            &filter_traits(&[], &["CUSTOM_SSD"], &[]),
            &AggregateFilter::default(),
        );
        assert_eq!(matched, BTreeSet::from([uuid(3), uuid(4)]));
    }

    #[test]
    fn any_of_is_or_within_the_group() {
        let index = ProviderIndex::build(&snapshot());
        let matched = index.matching(
            &filter_traits(&[], &[], &[&["CUSTOM_SSD", "CUSTOM_HDD"]]),
            &AggregateFilter::default(),
        );
        assert_eq!(matched, BTreeSet::from([uuid(1), uuid(2), uuid(3)]));
    }

    #[test]
    fn member_of_is_and_of_or_groups() {
        let index = ProviderIndex::build(&snapshot());
        let aggregates = AggregateFilter {
            member_of: vec![BTreeSet::from([uuid(0xa1)]), BTreeSet::from([uuid(0xa2)])],
        };
        let matched = index.matching(&TraitFilter::default(), &aggregates);
        // Only rp2 is in both aggregates.
        assert_eq!(matched, BTreeSet::from([uuid(2)]));

        let aggregates = AggregateFilter {
            member_of: vec![BTreeSet::from([uuid(0xa1), uuid(0xa2)])],
        };
        let matched = index.matching(&TraitFilter::default(), &aggregates);
        assert_eq!(matched, BTreeSet::from([uuid(1), uuid(2), uuid(4)]));
    }

    #[test]
    fn unknown_trait_matches_nothing() {
        let index = ProviderIndex::build(&snapshot());
        let matched = index.matching(
            &filter_traits(&["CUSTOM_GHOST"], &[], &[]),
            &AggregateFilter::default(),
        );
        assert!(matched.is_empty());
    }
}
