/// L1 + L2 cache composition
///
/// Reads route through the small fast L1 first and fall back to the larger
/// L2; an L2 hit is promoted back into L1 (copied, not moved, so a later L1
/// eviction does not force a recompute). Writes go through to both levels so
/// the tiers stay coherent without invalidation messages.
use crate::cache::key::CacheKey;
use crate::cache::store::{CacheEntry, ResultStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Aggregate hit/miss counters and sizes for both levels.
///
/// Counters increase monotonically until an explicit reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieredStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// Entries held across both levels (an entry resident in both counts twice)
    pub entries: usize,
    /// Approximate size: total result rows held across both levels
    pub approx_results: usize,
}

impl TieredStats {
    /// Overall hit rate across both levels
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.l1_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Two-level store: a bounded fast tier over an optional larger second tier
pub struct TieredStore {
    l1: Box<dyn ResultStore>,
    l2: Option<Box<dyn ResultStore>>,
    l1_hits: u64,
    l1_misses: u64,
    l2_hits: u64,
    l2_misses: u64,
}

impl TieredStore {
    pub fn new(l1: Box<dyn ResultStore>, l2: Option<Box<dyn ResultStore>>) -> Self {
        Self {
            l1,
            l2,
            l1_hits: 0,
            l1_misses: 0,
            l2_hits: 0,
            l2_misses: 0,
        }
    }

    /// Look up a key, promoting an L2 hit into L1
    pub fn get(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        if let Some(entry) = self.l1.get(key, now) {
            self.l1_hits += 1;
            return Some(entry);
        }

        if let Some(l2) = self.l2.as_mut() {
            if let Some(entry) = l2.get(key, now) {
                self.l2_hits += 1;
                // Promote a copy; L2 keeps its own so an L1 eviction does not
                // need a re-fetch from the origin
                debug!("Promoting entry from L2 to L1: {}", key);
                self.l1.set(key.clone(), entry.clone());
                return Some(entry);
            }
        }

        self.l1_misses += 1;
        // Without a second level there is no L2 miss to count
        if self.l2.is_some() {
            self.l2_misses += 1;
        }
        None
    }

    /// Write-through insert into both levels
    pub fn set(&mut self, key: CacheKey, entry: CacheEntry) {
        if let Some(l2) = self.l2.as_mut() {
            l2.set(key.clone(), entry.clone());
        }
        self.l1.set(key, entry);
    }

    /// Remove a key from both levels; returns whether either held it
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        let in_l1 = self.l1.delete(key);
        let in_l2 = self.l2.as_mut().map(|l2| l2.delete(key)).unwrap_or(false);
        in_l1 || in_l2
    }

    /// Whether a live entry exists in either level
    pub fn has(&self, key: &CacheKey, now: DateTime<Utc>) -> bool {
        self.l1.has(key, now) || self.l2.as_ref().map(|l2| l2.has(key, now)).unwrap_or(false)
    }

    /// Clear both levels. Callers hold the cache's single state lock, so no
    /// reader observes one tier cleared and the other not.
    pub fn invalidate_all(&mut self) {
        self.l1.clear();
        if let Some(l2) = self.l2.as_mut() {
            l2.clear();
        }
    }

    /// Sweep expired entries from both levels; returns the total removed
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = self.l1.prune(now);
        if let Some(l2) = self.l2.as_mut() {
            removed += l2.prune(now);
        }
        removed
    }

    /// Keys of Popular-tier entries in either level that expire within the
    /// lookahead window
    pub fn keys_needing_refresh(&self, now: DateTime<Utc>, lookahead: Duration) -> Vec<CacheKey> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for key in self.l1.refresh_candidates(now, lookahead) {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        if let Some(l2) = self.l2.as_ref() {
            for key in l2.refresh_candidates(now, lookahead) {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }

        keys
    }

    /// Aggregate counters for both levels
    pub fn stats(&self, now: DateTime<Utc>) -> TieredStats {
        let l1 = self.l1.stats(now);
        let l2 = self
            .l2
            .as_ref()
            .map(|l2| l2.stats(now))
            .unwrap_or_default();

        TieredStats {
            l1_hits: self.l1_hits,
            l1_misses: self.l1_misses,
            l2_hits: self.l2_hits,
            l2_misses: self.l2_misses,
            entries: l1.entries + l2.entries,
            approx_results: l1.approx_results + l2.approx_results,
        }
    }

    /// Reset hit/miss counters
    pub fn reset_stats(&mut self) {
        self.l1_hits = 0;
        self.l1_misses = 0;
        self.l2_hits = 0;
        self.l2_misses = 0;
    }
}
