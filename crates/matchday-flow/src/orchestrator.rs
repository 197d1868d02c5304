//! Stage-by-stage plan execution.
//!
//! The orchestrator walks an [`ExecutionPlan`] one stage at a time. Calls
//! within a stage are dispatched concurrently; a stage is never started
//! before every call in the previous stage has resolved. Per-call problems
//! never abort execution: every call gets a [`CallRecord`] and the caller
//! receives a complete [`ExecutionResult`].
//!
//! Each call runs through the same pipeline: circuit breaker admission,
//! cache/coalescer lookup, then (at most) a retried upstream fetch bounded
//! by the overall deadline and the caller's cancellation token.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::breaker::{Admission, CircuitRegistry};
use crate::cache::ResponseCache;
use crate::catalog::EndpointId;
use crate::client::{ApiClient, CallError, Payload};
use crate::config::FlowConfig;
use crate::metrics::FlowMetrics;
use crate::outcome::{
    self, CallFailure, CallOutcome, CallRecord, ExecutionResult, FailureKind, PayloadSource,
    SkipReason,
};
use crate::plan::{CallRequest, ExecutionPlan};
use crate::retry::AttemptState;

/// How one upstream attempt ended, including the two external interrupts.
enum AttemptEnd {
    Delivered(Payload),
    Transient(String),
    Permanent(String),
    Cancelled,
    DeadlineExceeded,
}

/// Executes plans against an upstream API client.
pub struct Orchestrator {
    client: Arc<dyn ApiClient>,
    cache: Arc<ResponseCache>,
    breakers: Arc<CircuitRegistry>,
    config: FlowConfig,
    metrics: FlowMetrics,
}

impl Orchestrator {
    /// Creates an orchestrator with its own cache and breaker registry
    /// sized from `config`.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>, config: FlowConfig) -> Self {
        let cache = Arc::new(ResponseCache::new(config.max_cache_entries));
        let breakers = Arc::new(CircuitRegistry::new(
            config.failure_threshold,
            config.cooldown,
            config.max_cooldown,
        ));
        Self::with_components(client, cache, breakers, config)
    }

    /// Creates an orchestrator sharing an existing cache and breaker
    /// registry, so several orchestrators (or request handlers) pool their
    /// upstream knowledge.
    #[must_use]
    pub fn with_components(
        client: Arc<dyn ApiClient>,
        cache: Arc<ResponseCache>,
        breakers: Arc<CircuitRegistry>,
        config: FlowConfig,
    ) -> Self {
        Self {
            client,
            cache,
            breakers,
            config,
            metrics: FlowMetrics::new(),
        }
    }

    /// Returns the response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Returns the circuit breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &CircuitRegistry {
        &self.breakers
    }

    /// Executes a plan to completion (or deadline).
    pub async fn execute(&self, plan: &ExecutionPlan) -> ExecutionResult {
        self.execute_cancellable(plan, &CancellationToken::new())
            .await
    }

    /// Executes a plan, stopping early if `cancel` fires.
    ///
    /// Cancellation is cooperative: calls that already resolved keep their
    /// outcomes, in-flight and not-yet-dispatched calls resolve as
    /// cancelled or skipped.
    #[tracing::instrument(skip_all, fields(plan_id = %plan.plan_id, calls = plan.len()))]
    pub async fn execute_cancellable(
        &self,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.config.overall_deadline;

        // Endpoints whose payload never materialized; their dependents are
        // skipped without dispatch.
        let mut unavailable: HashSet<EndpointId> = HashSet::new();

        let mut records: Vec<CallRecord> = Vec::with_capacity(plan.len());

        for (stage_index, stage) in plan.stages.iter().enumerate() {
            let stage_started = Instant::now();
            let stage_record_start = records.len();

            let mut pending = Vec::with_capacity(stage.requests.len());
            for request in &stage.requests {
                let blocked = request
                    .depends_on
                    .iter()
                    .find(|dep| unavailable.contains(*dep));
                if let Some(dependency) = blocked {
                    records.push(CallRecord {
                        endpoint: request.endpoint.clone(),
                        optional: request.optional,
                        outcome: CallOutcome::Skipped {
                            reason: SkipReason::DependencyFailed {
                                dependency: dependency.clone(),
                            },
                        },
                    });
                } else {
                    pending.push(request);
                }
            }

            let outcomes = future::join_all(
                pending
                    .iter()
                    .map(|request| self.run_call(request, deadline, cancel)),
            )
            .await;

            for (request, outcome) in pending.into_iter().zip(outcomes) {
                records.push(CallRecord {
                    endpoint: request.endpoint.clone(),
                    optional: request.optional,
                    outcome,
                });
            }

            for record in &records[stage_record_start..] {
                if !record.outcome.is_success() {
                    unavailable.insert(record.endpoint.clone());
                }
            }

            self.metrics
                .observe_stage_duration(stage_index, stage_started.elapsed());
        }

        let overall_status = outcome::aggregate(&records);
        tracing::debug!(
            plan_id = %plan.plan_id,
            status = ?overall_status,
            "plan execution finished"
        );

        ExecutionResult {
            plan_id: plan.plan_id.clone(),
            started_at,
            duration: started.elapsed(),
            records,
            overall_status,
        }
    }

    /// Resolves one planned call: admission, cache lookup, upstream fetch.
    #[tracing::instrument(skip_all, fields(endpoint = %request.endpoint))]
    async fn run_call(
        &self,
        request: &CallRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        let admission = self.breakers.admit(&request.endpoint);
        if admission == Admission::Reject {
            return CallOutcome::Skipped {
                reason: SkipReason::CircuitOpen,
            };
        }

        let ttl = request
            .cacheable
            .then(|| self.config.ttl.ttl_for(request.volatility));

        let call_started = Instant::now();
        let fetched = self
            .cache
            .get_or_fetch(&request.fingerprint, ttl, || {
                self.fetch_with_retries(request, deadline, cancel)
            })
            .await;

        match fetched {
            Ok((payload, source)) => {
                if admission == Admission::Probe && source != PayloadSource::Live {
                    // The probe slot was claimed but no upstream call ran;
                    // free it for the next caller.
                    self.breakers.release_probe(&request.endpoint);
                }
                CallOutcome::Success {
                    payload,
                    source,
                    latency: call_started.elapsed(),
                }
            }
            Err(failure) => {
                self.metrics.record_call_failed(&request.endpoint, failure.kind);
                CallOutcome::Failed(failure)
            }
        }
    }

    /// Drives the attempt state machine for one upstream fetch.
    ///
    /// Cancellation and the overall deadline interrupt both in-flight
    /// attempts and backoff waits; either counts as a breaker failure since
    /// the upstream never delivered.
    async fn fetch_with_retries(
        &self,
        request: &CallRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Payload, CallFailure> {
        let policy = self.config.retry_policy();
        let mut state = AttemptState::Idle;

        loop {
            state = state.start();

            let end = tokio::select! {
                () = cancel.cancelled() => AttemptEnd::Cancelled,
                () = time::sleep_until(deadline) => AttemptEnd::DeadlineExceeded,
                result = self.client.invoke(&request.endpoint, &request.params) => match result {
                    Ok(payload) => AttemptEnd::Delivered(payload),
                    Err(CallError::Transient(message)) => AttemptEnd::Transient(message),
                    Err(CallError::Permanent(message)) => AttemptEnd::Permanent(message),
                },
            };

            match end {
                AttemptEnd::Delivered(payload) => {
                    self.breakers.record_success(&request.endpoint);
                    return Ok(payload);
                }
                AttemptEnd::Transient(message) => {
                    self.breakers.record_failure(&request.endpoint);
                    state = state.fail_transient(&policy);

                    let AttemptState::Retrying { delay, .. } = state else {
                        tracing::warn!(
                            endpoint = %request.endpoint,
                            attempts = state.attempts(),
                            "retries exhausted"
                        );
                        return Err(CallFailure {
                            kind: FailureKind::Transient,
                            message,
                            attempts: state.attempts(),
                        });
                    };

                    self.metrics.record_call_retry(&request.endpoint);
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(CallFailure {
                                kind: FailureKind::Cancelled,
                                message: "execution cancelled during backoff".into(),
                                attempts: state.attempts(),
                            });
                        }
                        () = time::sleep_until(deadline) => {
                            return Err(CallFailure {
                                kind: FailureKind::Timeout,
                                message: "overall deadline exceeded during backoff".into(),
                                attempts: state.attempts(),
                            });
                        }
                        () = time::sleep(delay) => {}
                    }
                }
                AttemptEnd::Permanent(message) => {
                    self.breakers.record_failure(&request.endpoint);
                    state = state.fail_terminal();
                    return Err(CallFailure {
                        kind: FailureKind::Permanent,
                        message,
                        attempts: state.attempts(),
                    });
                }
                AttemptEnd::Cancelled => {
                    self.breakers.record_failure(&request.endpoint);
                    state = state.fail_terminal();
                    return Err(CallFailure {
                        kind: FailureKind::Cancelled,
                        message: "execution cancelled".into(),
                        attempts: state.attempts(),
                    });
                }
                AttemptEnd::DeadlineExceeded => {
                    self.breakers.record_failure(&request.endpoint);
                    state = state.fail_terminal();
                    return Err(CallFailure {
                        kind: FailureKind::Timeout,
                        message: "overall deadline exceeded".into(),
                        attempts: state.attempts(),
                    });
                }
            }
        }
    }
}
