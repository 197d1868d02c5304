//! Response cache with TTL and request coalescing.
//!
//! The cache owns all `CacheEntry` state. Lookups are keyed by call
//! [`Fingerprint`]; identical concurrent fetches share a single in-flight
//! upstream call (at most one live call per fingerprint at any instant).
//! Entries expire lazily on lookup, with an explicit [`ResponseCache::sweep`]
//! for periodic use and an entry cap with oldest-first eviction as a memory
//! safety valve.
//!
//! Clocks use `tokio::time::Instant` so TTL behavior is testable under a
//! paused runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::client::Payload;
use crate::metrics::FlowMetrics;
use crate::outcome::{CallFailure, FailureKind, PayloadSource};
use crate::plan::Fingerprint;

/// Result of one fetch as shared with coalesced callers.
type FetchOutcome = Result<Payload, CallFailure>;

/// A cached upstream payload.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Payload,
    created_at: Instant,
    expires_at: Instant,
}

/// Internal cache state protected by a single lock.
///
/// The lock is never held across an await point; mutations are short map
/// operations, so a std mutex is sufficient (and lets the drop guard run
/// synchronously).
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    in_flight: HashMap<Fingerprint, broadcast::Sender<FetchOutcome>>,
}

/// What a lookup resolved to, decided under the lock.
enum Lookup {
    Hit(Payload),
    Follower(broadcast::Receiver<FetchOutcome>),
    Leader,
}

/// TTL-bounded response cache that deduplicates identical concurrent
/// fetches.
#[derive(Debug)]
pub struct ResponseCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    metrics: FlowMetrics,
}

impl ResponseCache {
    /// Creates a cache bounded to `max_entries` stored payloads.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries,
            metrics: FlowMetrics::new(),
        }
    }

    /// Returns the cached payload for `fingerprint`, or runs `fetch` to
    /// produce it.
    ///
    /// - A live (non-expired) entry is returned without invoking `fetch`.
    /// - If an identical fingerprint is already being fetched, this caller
    ///   attaches to that in-flight operation and receives its result,
    ///   success or failure.
    /// - Otherwise this caller becomes the leader: it runs `fetch`, stores
    ///   the payload when `ttl` is `Some` and the fetch succeeded, and wakes
    ///   every attached caller. Failures are never stored; the in-flight
    ///   slot is released so the next caller retries independently.
    ///
    /// # Errors
    ///
    /// Returns the fetch's failure, shared verbatim with coalesced callers.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<(Payload, PayloadSource), CallFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome>,
    {
        let lookup = {
            let mut state = self.lock();

            match state.entries.get(fingerprint) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    Lookup::Hit(entry.payload.clone())
                }
                Some(_) => {
                    state.entries.remove(fingerprint);
                    self.join_or_lead(&mut state, fingerprint)
                }
                None => self.join_or_lead(&mut state, fingerprint),
            }
        };

        match lookup {
            Lookup::Hit(payload) => {
                self.metrics.record_cache_hit();
                Ok((payload, PayloadSource::Cache))
            }
            Lookup::Follower(mut rx) => {
                self.metrics.record_cache_coalesced();
                match rx.recv().await {
                    Ok(Ok(payload)) => Ok((payload, PayloadSource::Coalesced)),
                    Ok(Err(failure)) => Err(failure),
                    Err(_) => Err(CallFailure {
                        kind: FailureKind::Cancelled,
                        message: "coalesced fetch ended without a result".into(),
                        attempts: 0,
                    }),
                }
            }
            Lookup::Leader => {
                self.metrics.record_cache_miss();
                let guard = InFlightGuard {
                    cache: self,
                    fingerprint: fingerprint.clone(),
                    armed: true,
                };

                let outcome = fetch().await;
                self.settle(fingerprint, ttl, &outcome);
                guard.disarm();

                outcome.map(|payload| (payload, PayloadSource::Live))
            }
        }
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        before - state.entries.len()
    }

    /// Returns the number of stored (possibly expired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers this caller as follower or leader for a fingerprint.
    fn join_or_lead(&self, state: &mut CacheState, fingerprint: &Fingerprint) -> Lookup {
        if let Some(tx) = state.in_flight.get(fingerprint) {
            return Lookup::Follower(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        state.in_flight.insert(fingerprint.clone(), tx);
        Lookup::Leader
    }

    /// Completes a leader's fetch: store on success, release the slot, wake
    /// followers.
    fn settle(&self, fingerprint: &Fingerprint, ttl: Option<Duration>, outcome: &FetchOutcome) {
        let mut state = self.lock();

        if let (Ok(payload), Some(ttl)) = (outcome, ttl) {
            let now = Instant::now();
            state.entries.insert(
                fingerprint.clone(),
                CacheEntry {
                    payload: payload.clone(),
                    created_at: now,
                    expires_at: now + ttl,
                },
            );
            evict_oldest(&mut state, self.max_entries);
        }

        if let Some(tx) = state.in_flight.remove(fingerprint) {
            // Followers may have gone away; a send error is fine.
            let _ = tx.send(outcome.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Mutations are small map edits; recovering from a poisoned lock
        // cannot observe a half-applied update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Evicts oldest-created entries until the cap is respected.
fn evict_oldest(state: &mut CacheState, max_entries: usize) {
    while state.entries.len() > max_entries {
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(fingerprint, _)| fingerprint.clone());
        match oldest {
            Some(fingerprint) => {
                state.entries.remove(&fingerprint);
            }
            None => break,
        }
    }
}

/// Releases the in-flight slot if the leader's future is dropped before it
/// settles, so followers fail fast instead of waiting forever.
struct InFlightGuard<'a> {
    cache: &'a ResponseCache,
    fingerprint: Fingerprint,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.lock();
        if let Some(tx) = state.in_flight.remove(&self.fingerprint) {
            let _ = tx.send(Err(CallFailure {
                kind: FailureKind::Cancelled,
                message: "in-flight fetch dropped before completion".into(),
                attempts: 0,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::{advance, sleep};

    use crate::catalog::EndpointId;
    use crate::plan::Params;

    fn fingerprint(endpoint: &str) -> Fingerprint {
        Fingerprint::compute(&EndpointId::new(endpoint), &Params::new()).unwrap()
    }

    fn counted_fetch(
        calls: &Arc<AtomicUsize>,
        value: i64,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = FetchOutcome> + Send>> {
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({ "value": value }))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_entry_is_served_until_ttl_expires() {
        let cache = ResponseCache::new(16);
        let fp = fingerprint("teams");
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_secs(60));

        let (_, source) = cache
            .get_or_fetch(&fp, ttl, counted_fetch(&calls, 1))
            .await
            .unwrap();
        assert_eq!(source, PayloadSource::Live);

        let (_, source) = cache
            .get_or_fetch(&fp, ttl, counted_fetch(&calls, 2))
            .await
            .unwrap();
        assert_eq!(source, PayloadSource::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(61)).await;

        let (_, source) = cache
            .get_or_fetch(&fp, ttl, counted_fetch(&calls, 3))
            .await
            .unwrap();
        assert_eq!(source, PayloadSource::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_fetches_share_one_upstream_call() {
        let cache = ResponseCache::new(16);
        let fp = fingerprint("team_stats");
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_secs(60));

        let slow_fetch = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!({ "team": 7 }))
            }
        };

        let (first, second) = tokio::join!(
            cache.get_or_fetch(&fp, ttl, slow_fetch(&calls)),
            cache.get_or_fetch(&fp, ttl, slow_fetch(&calls)),
        );

        let (payload_a, source_a) = first.unwrap();
        let (payload_b, source_b) = second.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(payload_a, payload_b);
        assert_eq!(source_a, PayloadSource::Live);
        assert_eq!(source_b, PayloadSource::Coalesced);
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_callers_share_the_failure() {
        let cache = ResponseCache::new(16);
        let fp = fingerprint("fixtures");
        let calls = Arc::new(AtomicUsize::new(0));

        let failing_fetch = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Err(CallFailure {
                    kind: FailureKind::Transient,
                    message: "upstream 503".into(),
                    attempts: 3,
                })
            }
        };

        let (first, second) = tokio::join!(
            cache.get_or_fetch(&fp, None, failing_fetch(&calls)),
            cache.get_or_fetch(&fp, None, failing_fetch(&calls)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap_err().kind, FailureKind::Transient);
        assert_eq!(second.unwrap_err().kind, FailureKind::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached_and_release_the_slot() {
        let cache = ResponseCache::new(16);
        let fp = fingerprint("standings");
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_secs(60));

        let failing = {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallFailure {
                    kind: FailureKind::Permanent,
                    message: "bad request".into(),
                    attempts: 1,
                })
            }
        };

        assert!(cache.get_or_fetch(&fp, ttl, failing).await.is_err());
        assert!(cache.is_empty());

        // Next caller retries independently and succeeds.
        let (_, source) = cache
            .get_or_fetch(&fp, ttl, counted_fetch(&calls, 1))
            .await
            .unwrap();
        assert_eq!(source, PayloadSource::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_cacheable_fetches_are_never_stored() {
        let cache = ResponseCache::new(16);
        let fp = fingerprint("live_score");
        let calls = Arc::new(AtomicUsize::new(0));

        for round in 0..2 {
            let (_, source) = cache
                .get_or_fetch(&fp, None, counted_fetch(&calls, round))
                .await
                .unwrap();
            assert_eq!(source, PayloadSource::Live);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_cap_evicts_oldest_first() {
        let cache = ResponseCache::new(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_secs(600));

        for (i, endpoint) in ["competitions", "teams", "fixtures"].iter().enumerate() {
            let fp = fingerprint(endpoint);
            cache
                .get_or_fetch(&fp, ttl, counted_fetch(&calls, i64::try_from(i).unwrap()))
                .await
                .unwrap();
            // Distinct creation times so eviction order is well defined.
            advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.len(), 2);

        // The oldest entry (competitions) was evicted; a lookup refetches.
        let (_, source) = cache
            .get_or_fetch(&fingerprint("competitions"), ttl, counted_fetch(&calls, 9))
            .await
            .unwrap();
        assert_eq!(source, PayloadSource::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_expired_entries() {
        let cache = ResponseCache::new(16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch(
                &fingerprint("teams"),
                Some(Duration::from_secs(30)),
                counted_fetch(&calls, 1),
            )
            .await
            .unwrap();
        cache
            .get_or_fetch(
                &fingerprint("competitions"),
                Some(Duration::from_secs(600)),
                counted_fetch(&calls, 2),
            )
            .await
            .unwrap();

        advance(Duration::from_secs(60)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }
}
