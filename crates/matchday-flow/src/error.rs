//! Error types for the planning domain.
//!
//! Only planning-time problems surface as hard errors: no partial plan
//! exists to execute, so there is nothing to aggregate. Per-call failures
//! during execution are data inside the
//! [`ExecutionResult`](crate::outcome::ExecutionResult), never an `Err`.

use crate::catalog::EndpointId;

/// The result type used throughout matchday-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building an execution plan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cycle was detected in the endpoint dependency graph.
    #[error("cycle detected in endpoint dependency graph: {cycle:?}")]
    CycleDetected {
        /// Endpoints still blocked when layering stalled.
        cycle: Vec<String>,
    },

    /// A requested or referenced endpoint is unknown to the catalog.
    #[error("unknown endpoint: {endpoint}")]
    UnknownEndpoint {
        /// The endpoint id that was not found.
        endpoint: EndpointId,
    },

    /// A required parameter was not supplied for an endpoint in the plan.
    #[error("missing required parameter `{parameter}` for endpoint {endpoint}")]
    MissingParameter {
        /// The endpoint whose parameter schema was violated.
        endpoint: EndpointId,
        /// The name of the missing parameter.
        parameter: String,
    },

    /// Plan generation failed for a reason other than the above.
    #[error("plan generation failed: {message}")]
    PlanGenerationFailed {
        /// Description of the failure.
        message: String,
    },

    /// A graph node was not found (internal graph operation error).
    #[error("graph node not found: {node}")]
    DagNodeNotFound {
        /// The node identifier (index or value).
        node: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}
