//! Solver error types.

use std::time::{Duration, Instant};

use claimgrid_core::envelope;
use thiserror::Error;

/// Result type alias for solver operations.
pub type CandidateResult<T> = Result<T, CandidateError>;

/// Errors that can occur while parsing a request or enumerating candidates.
#[derive(Debug, Error)]
pub enum CandidateError {
    /// Malformed query parameter or an unsatisfiable request shape.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A parameter the request shape requires was absent.
    #[error("missing value: {0}")]
    MissingValue(String),

    /// Enumeration exceeded its deadline; no partial results are returned.
    #[error("candidate enumeration exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("state store error: {0}")]
    State(#[from] claimgrid_state::StateError),
}

impl CandidateError {
    /// Stable error code for the serialized envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CandidateError::BadRequest(_) => envelope::CODE_BAD_VALUE,
            CandidateError::MissingValue(_) => envelope::CODE_MISSING_VALUE,
            CandidateError::State(e) => e.code(),
            CandidateError::Timeout(_) => envelope::CODE_UNDEFINED,
        }
    }

    /// Wrap into the serialized error envelope.
    pub fn to_envelope(&self) -> claimgrid_core::ErrorEnvelope {
        claimgrid_core::ErrorEnvelope::single("placement error", self.code(), &self.to_string())
    }
}

/// Enumeration budget. Checked inside the hot loops; partial results are
/// never returned past expiry.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now() + budget,
            budget,
        }
    }

    pub fn check(&self) -> CandidateResult<()> {
        if Instant::now() >= self.expires {
            Err(CandidateError::Timeout(self.budget))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_bad_value() {
        let err = CandidateError::BadRequest("nope".to_string());
        assert_eq!(err.code(), "placement.query.bad_value");
        assert_eq!(err.to_envelope().errors[0].code, "placement.query.bad_value");
    }

    #[test]
    fn missing_value_has_its_own_code() {
        let err = CandidateError::MissingValue("group_policy".to_string());
        assert_eq!(err.code(), "placement.query.missing_value");
    }

    #[test]
    fn state_errors_pass_their_code_through() {
        let err = CandidateError::State(claimgrid_state::StateError::Conflict("x".to_string()));
        assert_eq!(err.code(), "placement.concurrent_update");
    }
}
