//! redb table definitions for the ClaimGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{rp}:{rc}` or
//! `{consumer}:{rp}:{rc}` so related rows cluster under a common prefix.

use redb::TableDefinition;

/// Resource providers keyed by `{uuid}`.
pub const PROVIDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("providers");

/// Inventory rows keyed by `{rp_uuid}:{resource_class}`.
pub const INVENTORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("inventories");

/// Trait sets keyed by `{rp_uuid}` (value: sorted list of trait names).
pub const PROVIDER_TRAITS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("provider_traits");

/// Aggregate memberships keyed by `{rp_uuid}` (value: sorted list of UUIDs).
pub const PROVIDER_AGGREGATES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("provider_aggregates");

/// Consumers keyed by `{uuid}`.
pub const CONSUMERS: TableDefinition<&str, &[u8]> = TableDefinition::new("consumers");

/// Allocation rows keyed by `{consumer_uuid}:{rp_uuid}:{resource_class}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");
