//! Retry policy and the per-call attempt state machine.
//!
//! Retries are modeled as an explicit state machine rather than nested
//! control flow so tests can assert exact attempt counts and delays.

use std::time::Duration;

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of upstream attempts per call.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per subsequent attempt.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Returns the delay to wait before `next_attempt` (1-based).
    ///
    /// The delay before attempt 2 is `base_delay`, doubling for each
    /// subsequent attempt, capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, next_attempt: u32) -> Duration {
        // Attempt 1 has no backoff; exponent saturates to avoid overflow.
        let exp = next_attempt.saturating_sub(2).min(16);
        let delay = self.base_delay.saturating_mul(1 << exp);
        delay.min(self.max_delay)
    }
}

/// Lifecycle of one call's attempts.
///
/// ```text
/// Idle ──► Attempting ──► Succeeded
///              │  ▲
///              │  └── Retrying (backoff)
///              │          │
///              └──────────┴──► Exhausted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// No attempt started yet.
    Idle,
    /// Attempt `attempt` (1-based) is in flight.
    Attempting {
        /// The in-flight attempt number.
        attempt: u32,
    },
    /// Waiting out `delay` before `next_attempt`.
    Retrying {
        /// The attempt number that will run after the backoff.
        next_attempt: u32,
        /// The backoff delay to wait.
        delay: Duration,
    },
    /// Terminal: the call succeeded after `attempts`.
    Succeeded {
        /// Total attempts made.
        attempts: u32,
    },
    /// Terminal: the call gave up after `attempts`.
    Exhausted {
        /// Total attempts made.
        attempts: u32,
    },
}

impl AttemptState {
    /// Starts the next attempt from `Idle` or `Retrying`.
    ///
    /// Terminal states and in-flight attempts are returned unchanged.
    #[must_use]
    pub const fn start(self) -> Self {
        match self {
            Self::Idle => Self::Attempting { attempt: 1 },
            Self::Retrying { next_attempt, .. } => Self::Attempting {
                attempt: next_attempt,
            },
            other => other,
        }
    }

    /// Marks the in-flight attempt as successful.
    #[must_use]
    pub const fn succeed(self) -> Self {
        match self {
            Self::Attempting { attempt } => Self::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// Records a transient failure of the in-flight attempt.
    ///
    /// Transitions to `Retrying` with the policy's backoff if attempts
    /// remain, otherwise to `Exhausted`.
    #[must_use]
    pub fn fail_transient(self, policy: &RetryPolicy) -> Self {
        match self {
            Self::Attempting { attempt } if attempt < policy.max_attempts => Self::Retrying {
                next_attempt: attempt + 1,
                delay: policy.backoff(attempt + 1),
            },
            Self::Attempting { attempt } => Self::Exhausted { attempts: attempt },
            other => other,
        }
    }

    /// Records a non-retryable failure (permanent error, cancellation).
    #[must_use]
    pub const fn fail_terminal(self) -> Self {
        match self {
            Self::Attempting { attempt } => Self::Exhausted { attempts: attempt },
            Self::Idle => Self::Exhausted { attempts: 0 },
            other => other,
        }
    }

    /// Returns the number of attempts made (or in flight) so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::Attempting { attempt } => *attempt,
            Self::Retrying { next_attempt, .. } => next_attempt.saturating_sub(1),
            Self::Succeeded { attempts } | Self::Exhausted { attempts } => *attempts,
        }
    }

    /// Returns true if no further attempts will run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}
