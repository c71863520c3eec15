//! claimgrid-candidates — the allocation-candidate solver.
//!
//! Given a parsed request of one or more resource groups (quantities,
//! required/forbidden traits, aggregate membership) plus the request-wide
//! `group_policy` and `same_subtree` constraints, enumerate every distinct
//! assignment of groups to resource providers that satisfies capacity,
//! qualitative, and structural constraints against a store snapshot.
//!
//! # Components
//!
//! - **`request`** — request groups, request-wide params, query parsing
//! - **`forest`** — provider arena with ancestor chains and subtree tests
//! - **`filter`** — trait/aggregate set algebra over inverted indexes
//! - **`capacity`** — per-class assignability from inventories and usage
//! - **`matcher`** — per-group match enumeration
//! - **`combiner`** — cross-group composition, dedup, limits, deadline
//! - **`summary`** — provider summaries for the response body
//! - **`solver`** — ties the pipeline together
//!
//! The solver's output is advisory: the allocation writer in
//! `claimgrid-state` re-establishes correctness at commit time.

pub mod capacity;
pub mod combiner;
pub mod error;
pub mod filter;
pub mod forest;
pub mod matcher;
pub mod request;
pub mod solver;
pub mod summary;

pub use combiner::{AllocationRequest, RequestedAllocations};
pub use error::{CandidateError, CandidateResult};
pub use forest::ProviderForest;
pub use request::{AggregateFilter, CandidateRequest, GroupPolicy, RequestGroup, TraitFilter};
pub use solver::{AllocationCandidates, Solver};
pub use summary::{ProviderSummary, SummaryResource};
