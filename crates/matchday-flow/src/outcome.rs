//! Per-call outcomes and the aggregated execution result.
//!
//! The orchestrator never raises a hard failure for a single endpoint's
//! problem; it always returns a complete [`ExecutionResult`] describing
//! every requested endpoint's fate, pushing the success/partial/failed
//! judgment to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::EndpointId;
use crate::client::Payload;

/// Where a successful payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    /// Served from a live (non-expired) cache entry; no upstream call.
    Cache,
    /// Fetched from the upstream API by this call.
    Live,
    /// Shared another concurrent caller's in-flight upstream call.
    Coalesced,
}

/// Classification of a terminal call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries were exhausted on transient upstream errors.
    Transient,
    /// The upstream rejected the call outright; never retried.
    Permanent,
    /// The overall execution deadline expired.
    Timeout,
    /// The execution was cancelled externally.
    Cancelled,
}

/// Terminal failure of one call after all attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub message: String,
    /// Number of upstream attempts actually made.
    pub attempts: u32,
}

/// Why a call was skipped without being attempted.
///
/// Skips are surfaced distinctly from failures so callers can tell
/// "upstream is unhealthy" from "this specific call failed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The endpoint's circuit breaker is open.
    CircuitOpen,
    /// A required dependency did not produce a payload.
    DependencyFailed {
        /// The dependency that failed or was itself skipped.
        dependency: EndpointId,
    },
}

/// Outcome of a single planned call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call produced a payload.
    Success {
        /// The response payload.
        payload: Payload,
        /// Where the payload came from.
        source: PayloadSource,
        /// Wall-clock time from dispatch to resolution.
        latency: Duration,
    },
    /// The call failed after exhausting its attempts.
    Failed(CallFailure),
    /// The call was never attempted.
    Skipped {
        /// Why the call was skipped.
        reason: SkipReason,
    },
}

impl CallOutcome {
    /// Returns true if the call produced a payload.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the payload if the call succeeded.
    #[must_use]
    pub const fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Returns the failure if the call failed.
    #[must_use]
    pub const fn failure(&self) -> Option<&CallFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns the skip reason if the call was skipped.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

/// One planned call's endpoint, optionality, and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// The endpoint the call targeted.
    pub endpoint: EndpointId,
    /// Whether the endpoint was flagged optional in the plan.
    pub optional: bool,
    /// What happened to the call.
    pub outcome: CallOutcome,
}

/// Aggregate verdict over all non-optional calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every non-optional call succeeded.
    Complete,
    /// Some non-optional calls succeeded, some did not.
    Partial,
    /// No non-optional call succeeded.
    Failed,
}

/// The result of executing a plan, tolerant of partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// The plan this result belongs to.
    pub plan_id: String,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock duration.
    pub duration: Duration,
    /// Per-call records in stage order.
    pub records: Vec<CallRecord>,
    /// Aggregate verdict over non-optional calls.
    pub overall_status: OverallStatus,
}

impl ExecutionResult {
    /// Returns the outcome recorded for an endpoint.
    #[must_use]
    pub fn outcome(&self, endpoint: &EndpointId) -> Option<&CallOutcome> {
        self.records
            .iter()
            .find(|r| &r.endpoint == endpoint)
            .map(|r| &r.outcome)
    }

    /// Returns the payload for an endpoint, if its call succeeded.
    #[must_use]
    pub fn payload(&self, endpoint: &EndpointId) -> Option<&Payload> {
        self.outcome(endpoint).and_then(CallOutcome::payload)
    }
}

/// Computes the aggregate verdict over a set of call records.
///
/// Optional-endpoint outcomes never change the verdict: only non-optional
/// records are counted. A plan with zero non-optional records is
/// `Complete`.
#[must_use]
pub fn aggregate(records: &[CallRecord]) -> OverallStatus {
    let mut succeeded = 0usize;
    let mut unsuccessful = 0usize;

    for record in records {
        if record.optional {
            continue;
        }
        if record.outcome.is_success() {
            succeeded += 1;
        } else {
            unsuccessful += 1;
        }
    }

    match (succeeded, unsuccessful) {
        (_, 0) => OverallStatus::Complete,
        (0, _) => OverallStatus::Failed,
        _ => OverallStatus::Partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(endpoint: &str, optional: bool) -> CallRecord {
        CallRecord {
            endpoint: EndpointId::new(endpoint),
            optional,
            outcome: CallOutcome::Success {
                payload: serde_json::json!({}),
                source: PayloadSource::Live,
                latency: Duration::from_millis(10),
            },
        }
    }

    fn failed(endpoint: &str, optional: bool) -> CallRecord {
        CallRecord {
            endpoint: EndpointId::new(endpoint),
            optional,
            outcome: CallOutcome::Failed(CallFailure {
                kind: FailureKind::Transient,
                message: "connection reset".into(),
                attempts: 3,
            }),
        }
    }

    fn skipped(endpoint: &str, optional: bool, dependency: &str) -> CallRecord {
        CallRecord {
            endpoint: EndpointId::new(endpoint),
            optional,
            outcome: CallOutcome::Skipped {
                reason: SkipReason::DependencyFailed {
                    dependency: EndpointId::new(dependency),
                },
            },
        }
    }

    #[test]
    fn all_required_successes_is_complete() {
        let records = vec![success("teams", false), success("fixtures", false)];
        assert_eq!(aggregate(&records), OverallStatus::Complete);
    }

    #[test]
    fn mixed_outcomes_are_partial() {
        let records = vec![
            success("standings", false),
            failed("teams", false),
            skipped("fixtures", false, "teams"),
        ];
        assert_eq!(aggregate(&records), OverallStatus::Partial);
    }

    #[test]
    fn no_required_success_is_failed() {
        let records = vec![failed("teams", false), skipped("fixtures", false, "teams")];
        assert_eq!(aggregate(&records), OverallStatus::Failed);
    }

    #[test]
    fn optional_failures_never_demote_complete() {
        let records = vec![success("teams", false), failed("injuries", true)];
        assert_eq!(aggregate(&records), OverallStatus::Complete);
    }

    #[test]
    fn only_optional_records_is_complete() {
        let records = vec![failed("injuries", true)];
        assert_eq!(aggregate(&records), OverallStatus::Complete);
    }

    #[test]
    fn result_exposes_payload_lookup() {
        let result = ExecutionResult {
            plan_id: "plan".into(),
            started_at: Utc::now(),
            duration: Duration::from_millis(5),
            records: vec![success("teams", false), failed("fixtures", false)],
            overall_status: OverallStatus::Partial,
        };

        assert!(result.payload(&EndpointId::new("teams")).is_some());
        assert!(result.payload(&EndpointId::new("fixtures")).is_none());
        assert!(result.outcome(&EndpointId::new("fixtures")).is_some());
    }
}
