//! The solver pipeline: validate, snapshot-index, match, combine, limit.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use claimgrid_core::SolverSettings;
use claimgrid_state::Snapshot;

use crate::capacity::CapacityView;
use crate::combiner::{combine, AllocationRequest};
use crate::error::{CandidateResult, Deadline};
use crate::filter::ProviderIndex;
use crate::forest::ProviderForest;
use crate::matcher::{match_group, GroupMatch};
use crate::request::CandidateRequest;
use crate::summary::{build_summaries, ProviderSummary};

/// The response body: candidates plus summaries of the trees they touch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationCandidates {
    pub allocation_requests: Vec<AllocationRequest>,
    pub provider_summaries: BTreeMap<Uuid, ProviderSummary>,
}

/// Candidate solver over one store snapshot.
///
/// Holds no cross-request mutable state; concurrent solvers over disjoint
/// requests are safe by construction. Output is advisory — the allocation
/// writer revalidates under its own transaction.
pub struct Solver<'a> {
    snapshot: &'a Snapshot,
    settings: SolverSettings,
}

impl<'a> Solver<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self::with_settings(snapshot, SolverSettings::default())
    }

    pub fn with_settings(snapshot: &'a Snapshot, settings: SolverSettings) -> Self {
        Self { snapshot, settings }
    }

    /// Enumerate allocation candidates for `request`.
    pub fn candidates(&self, request: &CandidateRequest) -> CandidateResult<AllocationCandidates> {
        request.validate()?;
        let deadline = Deadline::after(self.settings.deadline);

        let forest = ProviderForest::build(&self.snapshot.providers);
        let index = ProviderIndex::build(self.snapshot);
        let view = CapacityView::new(self.snapshot);

        let mut matches: BTreeMap<String, Vec<GroupMatch>> = BTreeMap::new();
        for (suffix, group) in &request.groups {
            let group_matches = match_group(group, &forest, &index, &view, &deadline)?;
            if group_matches.is_empty() {
                // One unsatisfiable group shoots the whole request.
                debug!(suffix = %suffix, "group has no matches, empty result");
                return Ok(AllocationCandidates::default());
            }
            matches.insert(suffix.clone(), group_matches);
        }

        let mut allocation_requests =
            combine(request, &matches, self.snapshot, &forest, &deadline)?;

        let limit = self.settings.effective_limit(request.limit);
        if allocation_requests.len() > limit {
            debug!(
                emitted = allocation_requests.len(),
                limit, "truncating allocation requests"
            );
            allocation_requests.truncate(limit);
        }

        let provider_summaries = build_summaries(self.snapshot, &forest, &allocation_requests);
        Ok(AllocationCandidates {
            allocation_requests,
            provider_summaries,
        })
    }
}
