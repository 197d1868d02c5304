//! Observability metrics for the orchestration engine.
//!
//! Metrics are emitted through the `metrics` crate facade: recording is
//! fire-and-forget and no-ops when no recorder is installed, so the core
//! never blocks on observability.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `matchday_flow_cache_events_total` | Counter | `result` | Cache lookups by result (hit/miss/coalesced) |
//! | `matchday_flow_circuit_transitions_total` | Counter | `endpoint`, `transition` | Circuit breaker opens/closes |
//! | `matchday_flow_call_retries_total` | Counter | `endpoint` | Retry attempts scheduled |
//! | `matchday_flow_calls_failed_total` | Counter | `endpoint`, `kind` | Calls that exhausted their attempts |
//! | `matchday_flow_stage_duration_seconds` | Histogram | `stage` | Wall-clock duration per plan stage |
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade. To export to
//! Prometheus:
//!
//! ```rust,ignore
//! use metrics_exporter_prometheus::PrometheusBuilder;
//!
//! PrometheusBuilder::new()
//!     .with_http_listener(([0, 0, 0, 0], 9090))
//!     .install()
//!     .expect("failed to install Prometheus recorder");
//! ```

use std::time::Duration;

use metrics::{counter, histogram};

use crate::catalog::EndpointId;
use crate::outcome::FailureKind;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: cache lookups by result.
    pub const CACHE_EVENTS_TOTAL: &str = "matchday_flow_cache_events_total";
    /// Counter: circuit breaker state transitions.
    pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "matchday_flow_circuit_transitions_total";
    /// Counter: retry attempts scheduled.
    pub const CALL_RETRIES_TOTAL: &str = "matchday_flow_call_retries_total";
    /// Counter: calls that exhausted their attempts.
    pub const CALLS_FAILED_TOTAL: &str = "matchday_flow_calls_failed_total";
    /// Histogram: wall-clock duration per plan stage in seconds.
    pub const STAGE_DURATION_SECONDS: &str = "matchday_flow_stage_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Cache lookup result (hit, miss, coalesced).
    pub const RESULT: &str = "result";
    /// Endpoint id.
    pub const ENDPOINT: &str = "endpoint";
    /// Circuit transition (opened, closed).
    pub const TRANSITION: &str = "transition";
    /// Failure classification.
    pub const KIND: &str = "kind";
    /// Stage index within the plan.
    pub const STAGE: &str = "stage";
}

/// High-level interface for recording orchestration metrics.
///
/// Cheap to clone and share; all methods are fire-and-forget.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a cache hit.
    pub fn record_cache_hit(&self) {
        counter!(names::CACHE_EVENTS_TOTAL, labels::RESULT => "hit").increment(1);
    }

    /// Records a cache miss (the caller becomes the live fetcher).
    pub fn record_cache_miss(&self) {
        counter!(names::CACHE_EVENTS_TOTAL, labels::RESULT => "miss").increment(1);
    }

    /// Records a lookup that attached to an in-flight fetch.
    pub fn record_cache_coalesced(&self) {
        counter!(names::CACHE_EVENTS_TOTAL, labels::RESULT => "coalesced").increment(1);
    }

    /// Records a circuit opening for an endpoint.
    pub fn record_circuit_opened(&self, endpoint: &EndpointId) {
        counter!(
            names::CIRCUIT_TRANSITIONS_TOTAL,
            labels::ENDPOINT => endpoint.to_string(),
            labels::TRANSITION => "opened",
        )
        .increment(1);
    }

    /// Records a circuit closing for an endpoint.
    pub fn record_circuit_closed(&self, endpoint: &EndpointId) {
        counter!(
            names::CIRCUIT_TRANSITIONS_TOTAL,
            labels::ENDPOINT => endpoint.to_string(),
            labels::TRANSITION => "closed",
        )
        .increment(1);
    }

    /// Records a retry being scheduled for an endpoint.
    pub fn record_call_retry(&self, endpoint: &EndpointId) {
        counter!(
            names::CALL_RETRIES_TOTAL,
            labels::ENDPOINT => endpoint.to_string(),
        )
        .increment(1);
    }

    /// Records a call failing terminally.
    pub fn record_call_failed(&self, endpoint: &EndpointId, kind: FailureKind) {
        let kind = match kind {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        counter!(
            names::CALLS_FAILED_TOTAL,
            labels::ENDPOINT => endpoint.to_string(),
            labels::KIND => kind,
        )
        .increment(1);
    }

    /// Records a stage completing, with its wall-clock duration.
    pub fn observe_stage_duration(&self, stage: usize, duration: Duration) {
        histogram!(
            names::STAGE_DURATION_SECONDS,
            labels::STAGE => stage.to_string(),
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_does_not_panic() {
        let metrics = FlowMetrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_coalesced();
        metrics.record_circuit_opened(&EndpointId::new("teams"));
        metrics.record_circuit_closed(&EndpointId::new("teams"));
        metrics.record_call_retry(&EndpointId::new("fixtures"));
        metrics.record_call_failed(&EndpointId::new("fixtures"), FailureKind::Transient);
        metrics.observe_stage_duration(0, Duration::from_millis(120));
    }
}
