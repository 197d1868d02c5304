//! Upstream API client contract.
//!
//! The raw client, connection pooling, and rate limiting against the
//! upstream host are external collaborators. The orchestrator only needs
//! this call contract, with the transient/permanent distinction that drives
//! retries and circuit-breaker accounting.

use async_trait::async_trait;

use crate::catalog::EndpointId;
use crate::plan::Params;

/// Payload returned by the upstream API for one endpoint call.
pub type Payload = serde_json::Value;

/// Errors surfaced by a single [`ApiClient`] call attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// Retryable failure: timeout, 5xx-equivalent, connection failure.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Non-retryable failure: bad parameters, 4xx-equivalent.
    ///
    /// Exhausts attempts immediately but still counts as one circuit
    /// breaker failure.
    #[error("permanent upstream error: {0}")]
    Permanent(String),
}

/// Raw upstream API client.
///
/// Implementations can talk HTTP, replay recorded responses, or script
/// behavior for tests.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Performs one call attempt against the upstream endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Transient`] for retryable failures and
    /// [`CallError::Permanent`] for non-retryable ones.
    async fn invoke(&self, endpoint: &EndpointId, params: &Params) -> Result<Payload, CallError>;
}
