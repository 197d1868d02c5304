//! Configuration surface for the orchestration engine.
//!
//! All knobs have documented defaults; construct a [`FlowConfig`] with
//! `..FlowConfig::default()` and override what a deployment needs.

use std::time::Duration;

use crate::catalog::Volatility;
use crate::retry::RetryPolicy;

/// Default consecutive-failure threshold before a circuit opens.
const fn default_failure_threshold() -> u32 {
    5
}

/// Default circuit cooldown: 30 seconds.
const fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

/// Default cooldown ceiling under exponential growth: 5 minutes.
const fn default_max_cooldown() -> Duration {
    Duration::from_secs(300)
}

/// Default maximum upstream attempts per call.
const fn default_max_attempts() -> u32 {
    3
}

/// Default backoff before the second attempt: 200 ms.
const fn default_backoff_base_delay() -> Duration {
    Duration::from_millis(200)
}

/// Default backoff ceiling: 5 seconds.
const fn default_backoff_max_delay() -> Duration {
    Duration::from_secs(5)
}

/// Default overall execution deadline: 30 seconds.
const fn default_overall_deadline() -> Duration {
    Duration::from_secs(30)
}

/// Default cache entry cap.
const fn default_max_cache_entries() -> usize {
    4096
}

/// Cache TTLs per volatility class.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    /// TTL for `Static` endpoints. Default: 3 days.
    pub static_ttl: Duration,
    /// TTL for `Daily` endpoints. Default: 6 hours.
    pub daily_ttl: Duration,
    /// TTL for `Live` endpoints. Default: 30 seconds.
    pub live_ttl: Duration,
}

impl TtlPolicy {
    /// Returns the TTL for a volatility class.
    #[must_use]
    pub const fn ttl_for(&self, volatility: Volatility) -> Duration {
        match volatility {
            Volatility::Static => self.static_ttl,
            Volatility::Daily => self.daily_ttl,
            Volatility::Live => self.live_ttl,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            static_ttl: Duration::from_secs(3 * 24 * 60 * 60),
            daily_ttl: Duration::from_secs(6 * 60 * 60),
            live_ttl: Duration::from_secs(30),
        }
    }
}

/// Orchestration engine configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Consecutive failures before an endpoint's circuit opens. Default: 5.
    pub failure_threshold: u32,
    /// Cooldown before an open circuit admits a half-open probe.
    /// Default: 30 s.
    pub cooldown: Duration,
    /// Cap on the cooldown as it doubles after failed probes.
    /// Default: 5 min.
    pub max_cooldown: Duration,
    /// Maximum upstream attempts per call. Default: 3.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    /// Default: 200 ms.
    pub backoff_base_delay: Duration,
    /// Cap on any single backoff delay. Default: 5 s.
    pub backoff_max_delay: Duration,
    /// Cache TTLs per volatility class.
    pub ttl: TtlPolicy,
    /// Overall wall-clock deadline for one plan execution. Default: 30 s.
    pub overall_deadline: Duration,
    /// Maximum cache entries before oldest-first eviction. Default: 4096.
    pub max_cache_entries: usize,
}

impl FlowConfig {
    /// Returns the retry policy derived from this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_base_delay,
            self.backoff_max_delay,
        )
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
            max_cooldown: default_max_cooldown(),
            max_attempts: default_max_attempts(),
            backoff_base_delay: default_backoff_base_delay(),
            backoff_max_delay: default_backoff_max_delay(),
            ttl: TtlPolicy::default(),
            overall_deadline: default_overall_deadline(),
            max_cache_entries: default_max_cache_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FlowConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.overall_deadline, Duration::from_secs(30));
        assert_eq!(config.ttl.live_ttl, Duration::from_secs(30));
    }

    #[test]
    fn ttl_policy_maps_volatility_classes() {
        let ttl = TtlPolicy::default();
        assert!(ttl.ttl_for(Volatility::Static) > ttl.ttl_for(Volatility::Daily));
        assert!(ttl.ttl_for(Volatility::Daily) > ttl.ttl_for(Volatility::Live));
    }

    #[test]
    fn retry_policy_is_derived_from_config() {
        let config = FlowConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
    }
}
