/// Background refresh of near-expiry popular entries
///
/// A periodic loop asks the tiered store which popular keys are close to
/// expiry, decodes each key back into its request, and recomputes it through
/// the caller-supplied search backend. Refresh is best effort: failures are
/// logged and swallowed, the stale entry stays in place until its natural
/// expiry, and the key always returns to the idle state so one failed
/// recompute can never lock a key out of future refreshes.
use crate::cache::key::{CacheKey, KeyCodec};
use crate::cache::CacheInner;
use crate::types::SearchBackend;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, warn};

/// Marks a key as refreshing for its lifetime.
///
/// Removal happens in `Drop`, so the key returns to idle no matter how the
/// recompute settles: success, error, or panic.
struct InFlightGuard {
    inner: Arc<CacheInner>,
    key: CacheKey,
}

impl InFlightGuard {
    /// Claim the key for refreshing. Returns `None` when the key is already
    /// in flight (the existing recompute is joined, never duplicated) or the
    /// concurrency cap is reached.
    fn try_begin(inner: Arc<CacheInner>, key: CacheKey, max_concurrent: usize) -> Option<Self> {
        {
            let mut in_flight = inner.in_flight();
            if in_flight.contains(&key) {
                debug!("Refresh already in flight for {}", key);
                return None;
            }
            if in_flight.len() >= max_concurrent {
                debug!("Refresh concurrency cap reached, deferring {}", key);
                return None;
            }
            in_flight.insert(key.clone());
        }
        Some(Self { inner, key })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight().remove(&self.key);
    }
}

/// Periodic driver for background refreshes
pub struct RefreshCoordinator {
    inner: Arc<CacheInner>,
    backend: Arc<dyn SearchBackend>,
}

impl RefreshCoordinator {
    pub(crate) fn new(inner: Arc<CacheInner>, backend: Arc<dyn SearchBackend>) -> Self {
        Self { inner, backend }
    }

    /// Run the refresh loop until the cache is closed or the task is aborted
    pub(crate) async fn run(self) {
        // Startup jitter so multiple processes don't refresh in lockstep
        let jitter_cap_ms = (self.inner.config.refresh_interval.as_millis() / 10) as u64;
        if jitter_cap_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..jitter_cap_ms);
            sleep(Duration::from_millis(jitter)).await;
        }

        let mut ticker = interval(self.inner.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.inner.closed.load(Ordering::Acquire) {
                break;
            }
            self.run_cycle();
        }
    }

    /// One refresh cycle: collect near-expiry popular keys and dispatch a
    /// recompute task for each key not already in flight, up to the
    /// concurrency cap. Dispatch is synchronous; the recomputes themselves
    /// run as detached tasks.
    pub fn run_cycle(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        let now = Utc::now();
        let candidates = {
            let mut state = self.inner.state();
            // Opportunistic maintenance, kept off the hot read path
            state
                .tracker
                .prune(self.inner.config.popularity_max_age, now);
            state
                .store
                .keys_needing_refresh(now, self.inner.config.refresh_lookahead)
        };

        if candidates.is_empty() {
            return;
        }
        debug!("Refresh cycle: {} candidate key(s)", candidates.len());

        for key in candidates {
            let Some(guard) = InFlightGuard::try_begin(
                self.inner.clone(),
                key.clone(),
                self.inner.config.max_concurrent_refreshes,
            ) else {
                continue;
            };

            let query = match KeyCodec::decode(&key) {
                Ok(query) => query,
                // Unrefreshable key: leave it to expire naturally
                Err(e) => {
                    warn!("Skipping refresh for undecodable key {}: {}", key, e);
                    continue;
                }
            };

            let backend = self.backend.clone();
            let inner = self.inner.clone();
            tokio::spawn(async move {
                // Guard lives for the whole recompute; dropping it returns
                // the key to idle
                let guard = guard;
                match backend.search(&query).await {
                    Ok(results) => {
                        debug!("Background refresh completed for {}", guard.key);
                        inner.store_payload(&query, Arc::new(results), Utc::now());
                    }
                    Err(e) => {
                        warn!("Background refresh failed for {}: {}", guard.key, e);
                    }
                }
            });
        }
    }
}
