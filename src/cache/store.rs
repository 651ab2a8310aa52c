/// Storage backends for cached result sets
///
/// Both cache tiers implement the same [`ResultStore`] interface so the
/// tiered composition depends only on the trait, and a larger or differently
/// backed second tier can be swapped in without touching the routing logic.
use crate::cache::key::CacheKey;
use crate::cache::popularity::TtlTier;
use crate::types::SearchResults;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One cached result set with its expiry bookkeeping.
///
/// The payload is behind an `Arc` so promotion between tiers copies a
/// pointer, not the result vector. Entries are replaced wholesale on
/// re-insert; there is no partial update.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached result payload (results + total count)
    pub payload: Arc<SearchResults>,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// TTL tier assigned at write time
    pub tier: TtlTier,
    /// Absolute expiry instant
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        payload: Arc<SearchResults>,
        tier: TtlTier,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            payload,
            created_at: now,
            tier,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the entry has passed its absolute expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counters for a single store level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live (non-expired) entries currently held
    pub entries: usize,
    /// Approximate size: total result rows across all live entries
    pub approx_results: usize,
}

/// Common interface for a single cache level
pub trait ResultStore: Send {
    /// Return the entry for a key if present and not expired. Refreshes the
    /// entry's recency. Expired entries are dropped on access.
    fn get(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry>;

    /// Insert or overwrite an entry, evicting as needed
    fn set(&mut self, key: CacheKey, entry: CacheEntry);

    /// Remove an entry; returns whether one was present
    fn delete(&mut self, key: &CacheKey) -> bool;

    /// Drop all entries
    fn clear(&mut self);

    /// Whether a live entry exists for the key. Does not touch recency.
    fn has(&self, key: &CacheKey, now: DateTime<Utc>) -> bool;

    /// Sweep out every expired entry regardless of recency; returns the
    /// number removed
    fn prune(&mut self, now: DateTime<Utc>) -> usize;

    /// Number of entries held, expired or not
    fn len(&self) -> usize;

    /// Keys of live Popular-tier entries that will expire within `lookahead`
    fn refresh_candidates(&self, now: DateTime<Utc>, lookahead: Duration) -> Vec<CacheKey>;

    /// Current counters for this level
    fn stats(&self, now: DateTime<Utc>) -> StoreStats;
}

struct StoredEntry {
    entry: CacheEntry,
    last_access: u64,
}

/// Fixed-capacity, TTL-aware store with least-recently-used eviction.
///
/// Recency is a monotone access counter stamped on every read and write;
/// eviction removes the entry with the smallest stamp. Expiry is checked
/// against each entry's stored absolute expiry on access, and `prune` sweeps
/// expired entries eagerly.
pub struct BoundedStore {
    entries: HashMap<CacheKey, StoredEntry>,
    max_entries: usize,
    tick: u64,
}

impl BoundedStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Evict the least-recently-used entry to make room for an insert
    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, stored)| stored.last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

impl ResultStore for BoundedStore {
    fn get(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let expired = match self.entries.get(key) {
            Some(stored) => stored.entry.is_expired(now),
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        let tick = self.next_tick();
        let stored = self.entries.get_mut(key)?;
        stored.last_access = tick;
        Some(stored.entry.clone())
    }

    fn set(&mut self, key: CacheKey, entry: CacheEntry) {
        let tick = self.next_tick();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        self.entries.insert(
            key,
            StoredEntry {
                entry,
                last_access: tick,
            },
        );
    }

    fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn has(&self, key: &CacheKey, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .map(|stored| !stored.entry.is_expired(now))
            .unwrap_or(false)
    }

    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.entry.is_expired(now));
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn refresh_candidates(&self, now: DateTime<Utc>, lookahead: Duration) -> Vec<CacheKey> {
        let window = chrono::Duration::from_std(lookahead).unwrap_or(chrono::Duration::MAX);
        let horizon = now
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.entries
            .iter()
            .filter(|(_, stored)| {
                stored.entry.tier == TtlTier::Popular
                    && !stored.entry.is_expired(now)
                    && stored.entry.expires_at <= horizon
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn stats(&self, now: DateTime<Utc>) -> StoreStats {
        let live = self
            .entries
            .values()
            .filter(|stored| !stored.entry.is_expired(now));

        let mut stats = StoreStats::default();
        for stored in live {
            stats.entries += 1;
            stats.approx_results += stored.entry.payload.results.len();
        }
        stats
    }
}
