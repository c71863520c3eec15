//! Provider forest — arena-indexed tree topology for one request.
//!
//! Rather than chasing pointers between providers, the forest holds them in
//! a flat arena indexed by dense id, with parent/root links and memoized
//! ancestor chains. Subtree membership is an ancestor-chain scan.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use claimgrid_state::ResourceProvider;

/// One provider's position in the forest.
#[derive(Debug, Clone)]
struct Node {
    uuid: Uuid,
    parent: Option<usize>,
    root: usize,
}

/// Arena of providers with parent/root links, built once per request.
#[derive(Debug, Clone, Default)]
pub struct ProviderForest {
    nodes: Vec<Node>,
    by_uuid: HashMap<Uuid, usize>,
}

impl ProviderForest {
    /// Build the forest from provider rows. Rows referencing a missing
    /// parent are treated as roots; the store prevents that from
    /// happening, but the solver never panics over a torn view.
    pub fn build(providers: &[ResourceProvider]) -> Self {
        let mut forest = Self {
            nodes: Vec::with_capacity(providers.len()),
            by_uuid: HashMap::with_capacity(providers.len()),
        };
        for provider in providers {
            forest.by_uuid.insert(provider.uuid, forest.nodes.len());
            forest.nodes.push(Node {
                uuid: provider.uuid,
                parent: None,
                root: 0,
            });
        }
        for (index, provider) in providers.iter().enumerate() {
            let parent = provider
                .parent_uuid
                .and_then(|parent| forest.by_uuid.get(&parent).copied());
            let root = forest
                .by_uuid
                .get(&provider.root_uuid)
                .copied()
                .unwrap_or(index);
            forest.nodes[index].parent = parent;
            forest.nodes[index].root = root;
        }
        forest
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, uuid: Uuid) -> Option<usize> {
        self.by_uuid.get(&uuid).copied()
    }

    /// UUID of the root of the tree containing `uuid`, if known.
    pub fn root_of(&self, uuid: Uuid) -> Option<Uuid> {
        let index = self.index_of(uuid)?;
        Some(self.nodes[self.nodes[index].root].uuid)
    }

    /// The ancestor chain of `uuid`, starting at the provider itself and
    /// ending at its root.
    pub fn ancestors(&self, uuid: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut cursor = self.index_of(uuid);
        while let Some(index) = cursor {
            chain.push(self.nodes[index].uuid);
            cursor = self.nodes[index].parent;
        }
        chain
    }

    /// `rp == anchor` or `anchor` is an ancestor of `rp`.
    pub fn is_in_subtree(&self, rp: Uuid, anchor: Uuid) -> bool {
        let mut cursor = self.index_of(rp);
        while let Some(index) = cursor {
            if self.nodes[index].uuid == anchor {
                return true;
            }
            cursor = self.nodes[index].parent;
        }
        false
    }

    /// Whether the providers admit a common ancestor *within the set*:
    /// one member must be an ancestor of (or equal to) every other.
    pub fn same_subtree(&self, providers: &BTreeSet<Uuid>) -> bool {
        if providers.len() <= 1 {
            return true;
        }
        let mut iter = providers.iter();
        let Some(&first) = iter.next() else {
            return true;
        };
        let mut common: BTreeSet<Uuid> = self.ancestors(first).into_iter().collect();
        for &uuid in iter {
            let chain: BTreeSet<Uuid> = self.ancestors(uuid).into_iter().collect();
            common = common.intersection(&chain).copied().collect();
            if common.is_empty() {
                return false;
            }
        }
        common.iter().any(|uuid| providers.contains(uuid))
    }
}
