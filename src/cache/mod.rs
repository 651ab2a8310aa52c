/// Adaptive tiered result cache for skill search
///
/// This module implements the caching layer that sits in front of the
/// registry's search and recommendation computation:
/// - Deterministic, reversible cache keys derived from requests
/// - A bounded L1 LRU store over an optional larger L2 store
/// - Popularity-driven TTL tiers (rare/standard/popular)
/// - Background refresh of near-expiry popular entries, with at most one
///   in-flight recompute per key
pub mod key;
pub mod popularity;
pub mod refresh;
pub mod store;
pub mod tiered;


pub use key::{CacheKey, KeyCodec};
pub use popularity::{PopularityRecord, PopularityTracker, TierHistogram, TierPolicy, TtlTier};
pub use refresh::RefreshCoordinator;
pub use store::{BoundedStore, CacheEntry, ResultStore, StoreStats};
pub use tiered::{TieredStats, TieredStore};

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::types::{SearchBackend, SearchResults, SkillQuery};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Combined cache statistics for monitoring
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Hit/miss counters and sizes from the tiered store
    pub store: TieredStats,
    /// How many tracked keys currently classify into each TTL tier
    pub tiers: TierHistogram,
    /// Number of keys with a popularity record
    pub tracked_keys: usize,
    /// Number of refresh callbacks currently in flight
    pub in_flight_refreshes: usize,
    /// When the cache was last fully invalidated
    pub last_invalidated: Option<DateTime<Utc>>,
}

/// Counts returned by a maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Expired entries removed from the stores
    pub expired_entries: usize,
    /// Stale popularity records removed from the tracker
    pub stale_popularity_records: usize,
}

/// Registered invalidation listener handle.
///
/// Calling [`unsubscribe`](Self::unsubscribe) removes exactly the listener
/// this handle was returned for. Dropping the handle leaves the listener
/// registered.
pub struct InvalidationSubscription {
    id: u64,
    inner: Weak<CacheInner>,
}

impl InvalidationSubscription {
    /// Remove the listener this subscription refers to
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut listeners = inner.listeners();
            listeners.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: Vec<(u64, Listener)>,
    next_id: u64,
}

pub(crate) struct CacheState {
    pub(crate) store: TieredStore,
    pub(crate) tracker: PopularityTracker,
    pub(crate) last_invalidated: Option<DateTime<Utc>>,
}

/// State shared between the facade and the background refresher.
///
/// Store and tracker mutations all happen under the single `state` lock,
/// which is never held across an await point; this preserves the atomicity
/// the single-writer model requires on a multi-threaded runtime.
pub(crate) struct CacheInner {
    pub(crate) config: CacheConfig,
    pub(crate) policy: TierPolicy,
    pub(crate) state: Mutex<CacheState>,
    pub(crate) listeners: Mutex<ListenerRegistry>,
    /// Keys with a refresh recompute currently in flight
    pub(crate) in_flight: Mutex<HashSet<CacheKey>>,
    pub(crate) closed: AtomicBool,
}

impl CacheInner {
    pub(crate) fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache state lock poisoned")
    }

    pub(crate) fn listeners(&self) -> MutexGuard<'_, ListenerRegistry> {
        self.listeners.lock().expect("listener lock poisoned")
    }

    pub(crate) fn in_flight(&self) -> MutexGuard<'_, HashSet<CacheKey>> {
        self.in_flight.lock().expect("in-flight lock poisoned")
    }

    /// Classify the key's tier and write the payload through both store
    /// levels. Shared by the public `set` path and the background refresher,
    /// so a refreshed key can shift tiers between refreshes.
    pub(crate) fn store_payload(
        &self,
        query: &SkillQuery,
        payload: Arc<SearchResults>,
        now: DateTime<Utc>,
    ) {
        let key = KeyCodec::encode(query);
        let mut state = self.state();
        let tier = self.policy.classify(state.tracker.record(&key), now);
        let ttl = self.policy.ttl_for(tier);
        debug!("Caching results for {} (tier: {:?}, ttl: {:?})", key, tier, ttl);
        state
            .store
            .set(key, CacheEntry::new(payload, tier, ttl, now));
    }
}

/// Public facade over the tiered cache.
///
/// Cheap to share: clones of the manager operate on the same cache.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
    refresh_task: Arc<Mutex<Option<AbortHandle>>>,
}

impl CacheManager {
    /// Create a cache manager, validating the configuration once
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let policy = TierPolicy::new(&config);
        let l1: Box<dyn ResultStore> = Box::new(BoundedStore::new(config.l1_max_entries));
        let l2 = config
            .l2_max_entries
            .map(|n| Box::new(BoundedStore::new(n)) as Box<dyn ResultStore>);

        info!(
            "Initializing result cache (l1: {} entries, l2: {:?} entries)",
            config.l1_max_entries, config.l2_max_entries
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                policy,
                state: Mutex::new(CacheState {
                    store: TieredStore::new(l1, l2),
                    tracker: PopularityTracker::new(),
                    last_invalidated: None,
                }),
                listeners: Mutex::new(ListenerRegistry::default()),
                in_flight: Mutex::new(HashSet::new()),
                closed: AtomicBool::new(false),
            }),
            refresh_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Look up cached results for a request. A hit records popularity for
    /// the key; a miss records nothing.
    pub fn get(&self, query: &SkillQuery) -> Option<Arc<SearchResults>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }

        let key = KeyCodec::encode(query);
        let now = Utc::now();
        let mut state = self.inner.state();

        match state.store.get(&key, now) {
            Some(entry) => {
                state.tracker.record_hit(&key, now);
                debug!("Cache hit for {}", key);
                Some(entry.payload)
            }
            None => {
                debug!("Cache miss for {}", key);
                None
            }
        }
    }

    /// Look up cached results, computing and storing them on a miss.
    ///
    /// The compute callback is caller-supplied and assumed slow; its errors
    /// propagate unchanged and nothing is cached on failure.
    pub async fn get_or_compute<F, Fut>(
        &self,
        query: &SkillQuery,
        compute: F,
    ) -> anyhow::Result<Arc<SearchResults>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<SearchResults>>,
    {
        if let Some(hit) = self.get(query) {
            return Ok(hit);
        }

        let payload = Arc::new(compute().await?);
        if !self.inner.closed.load(Ordering::Acquire) {
            self.inner.store_payload(query, payload.clone(), Utc::now());
        }
        Ok(payload)
    }

    /// Cache results for a request, deriving the TTL tier from the key's
    /// popularity. Replaces any existing entry wholesale.
    pub fn set(&self, query: &SkillQuery, results: SearchResults) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner
            .store_payload(query, Arc::new(results), Utc::now());
    }

    /// Remove the cached entry for one request from both levels
    pub fn delete(&self, query: &SkillQuery) -> bool {
        let key = KeyCodec::encode(query);
        self.inner.state().store.delete(&key)
    }

    /// Clear both store levels and all popularity records, then notify every
    /// registered listener synchronously. A panicking listener is contained
    /// so the remaining listeners and the invalidation itself still complete.
    pub fn invalidate_all(&self) {
        let now = Utc::now();
        {
            let mut state = self.inner.state();
            state.store.invalidate_all();
            state.tracker.clear();
            state.last_invalidated = Some(now);
        }

        let snapshot: Vec<Listener> = self
            .inner
            .listeners()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!("Invalidation listener panicked; continuing with remaining listeners");
            }
        }

        info!("Cache invalidated");
    }

    /// Register an invalidation listener. The returned subscription removes
    /// exactly this listener when unsubscribed.
    pub fn on_invalidate<F>(&self, callback: F) -> InvalidationSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(callback)));

        InvalidationSubscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Sweep expired entries from both store levels and stale popularity
    /// records from the tracker
    pub fn prune(&self) -> PruneReport {
        let now = Utc::now();
        let max_age = self.inner.config.popularity_max_age;
        let mut state = self.inner.state();

        PruneReport {
            expired_entries: state.store.prune(now),
            stale_popularity_records: state.tracker.prune(max_age, now),
        }
    }

    /// Current statistics: store counters, popularity-tier histogram and
    /// refresh state
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let (store, tiers, tracked_keys, last_invalidated) = {
            let state = self.inner.state();
            (
                state.store.stats(now),
                state.tracker.histogram(&self.inner.policy, now),
                state.tracker.len(),
                state.last_invalidated,
            )
        };

        CacheStats {
            store,
            tiers,
            tracked_keys,
            in_flight_refreshes: self.inner.in_flight().len(),
            last_invalidated,
        }
    }

    /// Start the background refresh loop against the given search backend.
    ///
    /// No-op if a refresher is already running. The spawned task never
    /// blocks process shutdown; [`close`](Self::close) stops it.
    pub fn start_refresh(&self, backend: Arc<dyn SearchBackend>) {
        let mut slot = self.refresh_task.lock().expect("refresh task lock poisoned");
        if slot.is_some() {
            warn!("Background refresh already running");
            return;
        }

        let coordinator = RefreshCoordinator::new(self.inner.clone(), backend);
        let handle = tokio::spawn(coordinator.run());
        *slot = Some(handle.abort_handle());
        info!(
            "Background refresh started (interval: {:?}, lookahead: {:?}, max concurrent: {})",
            self.inner.config.refresh_interval,
            self.inner.config.refresh_lookahead,
            self.inner.config.max_concurrent_refreshes
        );
    }

    /// Stop the background refresher and clear all tracked state.
    /// Idempotent; later calls are no-ops.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self
            .refresh_task
            .lock()
            .expect("refresh task lock poisoned")
            .take()
        {
            handle.abort();
        }

        {
            let mut state = self.inner.state();
            state.store.invalidate_all();
            state.tracker.clear();
        }
        self.inner.listeners().entries.clear();
        self.inner.in_flight().clear();

        info!("Cache closed");
    }

    pub(crate) fn inner(&self) -> &Arc<CacheInner> {
        &self.inner
    }
}
