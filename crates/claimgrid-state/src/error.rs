//! Error types for the ClaimGrid state store.

use claimgrid_core::envelope;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("malformed payload: {0}")]
    BadRequest(String),

    /// A generation check failed; the caller's view is stale.
    #[error("concurrent update detected: {0}")]
    Conflict(String),

    /// Writing the requested amounts would exceed effective capacity.
    #[error("capacity exceeded for {resource_class} on provider {provider}")]
    CapacityExceeded {
        provider: Uuid,
        resource_class: String,
    },

    /// An allocation amount violates min_unit/max_unit/step_size.
    #[error("amount violates inventory constraints for {resource_class} on provider {provider}")]
    ConstraintViolated {
        provider: Uuid,
        resource_class: String,
    },

    /// An inventory row cannot be removed or shrunk while allocated.
    #[error("inventory for {resource_classes} on provider {provider} in use")]
    InventoryInUse {
        provider: Uuid,
        resource_classes: String,
    },

    /// A provider cannot be deleted while it has children or allocations.
    #[error("resource provider in use: {0}")]
    ProviderInUse(String),

    /// A stored-state invariant no longer holds. Surfaced as a 500.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl StateError {
    /// Stable error code for the serialized envelope.
    pub fn code(&self) -> &'static str {
        match self {
            StateError::Conflict(_) => envelope::CODE_CONCURRENT_UPDATE,
            StateError::InventoryInUse { .. } => envelope::CODE_INVENTORY_IN_USE,
            _ => envelope::CODE_UNDEFINED,
        }
    }

    /// Wrap into the serialized error envelope.
    pub fn to_envelope(&self) -> claimgrid_core::ErrorEnvelope {
        claimgrid_core::ErrorEnvelope::single("placement error", self.code(), &self.to_string())
    }
}
