//! Serialized error envelope and the stable error codes.
//!
//! Every error surfaced to a client is wrapped in an envelope of the form
//! `{"errors": [{"title", "code", "detail"}]}`. Clients dispatch on `code`;
//! `detail` strings carry no compatibility guarantee.

use serde::{Deserialize, Serialize};

/// A query parameter carried a malformed or unusable value.
pub const CODE_BAD_VALUE: &str = "placement.query.bad_value";

/// A required query parameter was absent.
pub const CODE_MISSING_VALUE: &str = "placement.query.missing_value";

/// A generation check failed; re-read and retry.
pub const CODE_CONCURRENT_UPDATE: &str = "placement.concurrent_update";

/// An inventory cannot be changed while allocations consume it.
pub const CODE_INVENTORY_IN_USE: &str = "placement.inventory.inuse";

/// Fallback for errors with no more specific code.
pub const CODE_UNDEFINED: &str = "placement.undefined_code";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub title: String,
    pub code: String,
    pub detail: String,
}

impl ErrorEnvelope {
    /// Wrap a single error.
    pub fn single(title: &str, code: &str, detail: &str) -> Self {
        Self {
            errors: vec![ApiError {
                title: title.to_string(),
                code: code.to_string(),
                detail: detail.to_string(),
            }],
        }
    }
}
