//! claimgrid-state — embedded state store for the ClaimGrid placement service.
//!
//! Backed by [redb](https://docs.rs/redb), persists the provider forest with
//! its inventories, traits, and aggregate memberships, plus consumers and
//! their allocations.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{rp}:{rc}`, `{consumer}:{rp}:{rc}`) enable efficient
//! prefix scans for related records. Every logical mutation runs in a single
//! redb write transaction; redb's single-writer model makes multi-row writes
//! serializable, which is what the allocation write path relies on.
//!
//! Optimistic concurrency: providers and consumers carry a monotonically
//! increasing `generation`. Mutations take the generation the caller last
//! observed and fail with [`StateError::Conflict`] when it no longer matches.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod alloc;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod types;

pub use alloc::{BundleWrite, ProviderClaim};
pub use error::{StateError, StateResult};
pub use snapshot::Snapshot;
pub use store::StateStore;
pub use types::*;
