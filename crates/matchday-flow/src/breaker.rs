//! Per-endpoint circuit breakers.
//!
//! Breakers are scoped per endpoint id, not per fingerprint: an upstream
//! that is failing for one parameter set is almost always failing for all
//! of them, and per-endpoint scope lets a single probe re-open the whole
//! endpoint at once.
//!
//! State machine:
//!
//! ```text
//!            failures >= threshold
//! Closed ─────────────────────────► Open
//!   ▲                                 │ cooldown elapsed
//!   │ probe succeeds                  ▼
//!   └───────────────────────────── HalfOpen
//!                                     │ probe fails
//!                                     └──► Open (cooldown doubled)
//! ```
//!
//! Cooldowns use `tokio::time::Instant` so transitions are testable under a
//! paused runtime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::catalog::EndpointId;
use crate::metrics::FlowMetrics;

/// Observable state of one endpoint's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without reaching the upstream.
    Open,
    /// One probe call is admitted to test recovery.
    HalfOpen,
}

/// Verdict for a call asking to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed; proceed normally.
    Allow,
    /// The circuit is half-open and this call is the single probe.
    Probe,
    /// The circuit is open; skip without attempting.
    Reject,
}

#[derive(Debug)]
struct Target {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

impl Target {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown,
            probe_in_flight: false,
        }
    }
}

/// Registry of circuit breakers, one per endpoint.
#[derive(Debug)]
pub struct CircuitRegistry {
    targets: Mutex<HashMap<EndpointId, Target>>,
    failure_threshold: u32,
    cooldown: Duration,
    max_cooldown: Duration,
    metrics: FlowMetrics,
}

impl CircuitRegistry {
    /// Creates a registry with the given failure threshold and cooldown
    /// bounds.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration, max_cooldown: Duration) -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            failure_threshold,
            cooldown,
            max_cooldown,
            metrics: FlowMetrics::new(),
        }
    }

    /// Asks whether a call to `endpoint` may proceed.
    ///
    /// An open circuit whose cooldown has elapsed transitions to half-open
    /// and admits exactly one probe; further callers are rejected until the
    /// probe resolves.
    pub fn admit(&self, endpoint: &EndpointId) -> Admission {
        let mut targets = self.lock();
        let target = targets
            .entry(endpoint.clone())
            .or_insert_with(|| Target::new(self.cooldown));

        match target.state {
            CircuitState::Closed => Admission::Allow,
            CircuitState::Open => {
                let elapsed = target
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= target.cooldown);
                if elapsed {
                    target.state = CircuitState::HalfOpen;
                    target.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if target.probe_in_flight {
                    Admission::Reject
                } else {
                    target.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Records a successful call, closing the circuit and resetting its
    /// failure count and cooldown.
    pub fn record_success(&self, endpoint: &EndpointId) {
        let mut targets = self.lock();
        let target = targets
            .entry(endpoint.clone())
            .or_insert_with(|| Target::new(self.cooldown));

        if target.state != CircuitState::Closed {
            self.metrics.record_circuit_closed(endpoint);
        }
        target.state = CircuitState::Closed;
        target.consecutive_failures = 0;
        target.opened_at = None;
        target.cooldown = self.cooldown;
        target.probe_in_flight = false;
    }

    /// Records a failed call.
    ///
    /// A closed circuit opens once consecutive failures reach the
    /// threshold. A failed half-open probe re-opens with a doubled
    /// cooldown, capped at the configured maximum.
    pub fn record_failure(&self, endpoint: &EndpointId) {
        let mut targets = self.lock();
        let target = targets
            .entry(endpoint.clone())
            .or_insert_with(|| Target::new(self.cooldown));

        match target.state {
            CircuitState::Closed => {
                target.consecutive_failures += 1;
                if target.consecutive_failures >= self.failure_threshold {
                    target.state = CircuitState::Open;
                    target.opened_at = Some(Instant::now());
                    self.metrics.record_circuit_opened(endpoint);
                }
            }
            CircuitState::HalfOpen => {
                target.state = CircuitState::Open;
                target.opened_at = Some(Instant::now());
                target.cooldown = (target.cooldown * 2).min(self.max_cooldown);
                target.probe_in_flight = false;
                self.metrics.record_circuit_opened(endpoint);
            }
            // Failures reported while already open (e.g. from a call that
            // was admitted just before the circuit tripped) change nothing.
            CircuitState::Open => {}
        }
    }

    /// Releases a probe admission that resolved without an upstream call
    /// (cache hit or coalesced result), so the next caller can probe.
    pub fn release_probe(&self, endpoint: &EndpointId) {
        let mut targets = self.lock();
        if let Some(target) = targets.get_mut(endpoint) {
            if target.state == CircuitState::HalfOpen {
                target.probe_in_flight = false;
            }
        }
    }

    /// Returns the current state of an endpoint's breaker.
    #[must_use]
    pub fn state(&self, endpoint: &EndpointId) -> CircuitState {
        self.lock()
            .get(endpoint)
            .map_or(CircuitState::Closed, |target| target.state)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EndpointId, Target>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
