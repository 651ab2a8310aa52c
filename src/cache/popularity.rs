/// Per-key popularity bookkeeping and TTL tier selection
///
/// Every cache hit is recorded against its key. The accumulated hit count and
/// record age decide which TTL tier the key's entries get on the next write:
/// rarely-seen queries expire quickly, popular queries are trusted for hours
/// and become eligible for background refresh.
use crate::cache::key::CacheKey;
use crate::config::CacheConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::time::Duration as StdDuration;

/// TTL tier assigned to a cached entry. Ordinal: a hotter tier always
/// compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TtlTier {
    Rare = 0,
    Standard = 1,
    Popular = 2,
}

/// Hit/age bookkeeping for a single key
#[derive(Debug, Clone)]
pub struct PopularityRecord {
    /// Number of cache hits observed for this key
    pub hits: u64,
    /// When the first hit was observed
    pub first_seen: DateTime<Utc>,
    /// When the most recent hit was observed
    pub last_seen: DateTime<Utc>,
}

/// Pure mapping from popularity statistics to a TTL tier.
///
/// Classification is a deterministic function of (hit count, record age,
/// now): recomputing with the same inputs always yields the same tier.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    standard_hit_threshold: u64,
    popular_hit_threshold: u64,
    min_observation_window: Duration,
    rare_ttl: StdDuration,
    standard_ttl: StdDuration,
    popular_ttl: StdDuration,
}

impl TierPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            standard_hit_threshold: config.standard_hit_threshold,
            popular_hit_threshold: config.popular_hit_threshold,
            min_observation_window: Duration::from_std(config.min_observation_window)
                .unwrap_or(Duration::MAX),
            rare_ttl: config.rare_ttl,
            standard_ttl: config.standard_ttl,
            popular_ttl: config.popular_ttl,
        }
    }

    /// Classify a key's popularity record into a TTL tier.
    ///
    /// A key with no record is Rare. Popular additionally requires the record
    /// to be older than the minimum observation window, so a burst of
    /// near-simultaneous hits is not mistaken for durable popularity.
    pub fn classify(&self, record: Option<&PopularityRecord>, now: DateTime<Utc>) -> TtlTier {
        let Some(record) = record else {
            return TtlTier::Rare;
        };

        if record.hits >= self.popular_hit_threshold
            && now - record.first_seen >= self.min_observation_window
        {
            return TtlTier::Popular;
        }

        if record.hits >= self.standard_hit_threshold {
            return TtlTier::Standard;
        }

        TtlTier::Rare
    }

    /// TTL duration bound to a tier
    pub fn ttl_for(&self, tier: TtlTier) -> StdDuration {
        match tier {
            TtlTier::Rare => self.rare_ttl,
            TtlTier::Standard => self.standard_ttl,
            TtlTier::Popular => self.popular_ttl,
        }
    }
}

/// Per-tier key counts for stats reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierHistogram {
    pub popular: usize,
    pub standard: usize,
    pub rare: usize,
}

/// Tracks hit counts and ages for cache keys.
///
/// Records are created on the first cache hit for a key (not on miss, not on
/// write), mutated on every later hit, and pruned once they go a full
/// staleness window without a hit.
#[derive(Debug, Default)]
pub struct PopularityTracker {
    records: HashMap<CacheKey, PopularityRecord>,
}

impl PopularityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit for a key
    pub fn record_hit(&mut self, key: &CacheKey, now: DateTime<Utc>) {
        match self.records.get_mut(key) {
            Some(record) => {
                record.hits += 1;
                record.last_seen = now;
            }
            None => {
                self.records.insert(
                    key.clone(),
                    PopularityRecord {
                        hits: 1,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Get the popularity record for a key, if any
    pub fn record(&self, key: &CacheKey) -> Option<&PopularityRecord> {
        self.records.get(key)
    }

    /// Remove records whose last hit is older than `max_age`.
    ///
    /// Returns the number of records removed. Runs on explicit maintenance
    /// calls and background ticks, never on the hot read path.
    pub fn prune(&mut self, max_age: StdDuration, now: DateTime<Utc>) -> usize {
        let cutoff = Duration::from_std(max_age).unwrap_or(Duration::MAX);
        let before = self.records.len();
        self.records.retain(|_, record| now - record.last_seen <= cutoff);
        before - self.records.len()
    }

    /// Count tracked keys per tier under the given policy
    pub fn histogram(&self, policy: &TierPolicy, now: DateTime<Utc>) -> TierHistogram {
        let mut histogram = TierHistogram::default();
        for record in self.records.values() {
            match policy.classify(Some(record), now) {
                TtlTier::Popular => histogram.popular += 1,
                TtlTier::Standard => histogram.standard += 1,
                TtlTier::Rare => histogram.rare += 1,
            }
        }
        histogram
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> TierPolicy {
        TierPolicy::new(&CacheConfig::default())
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::from_raw(format!("search:{}::20:0", name))
    }

    #[test]
    fn test_first_hit_creates_record() {
        let mut tracker = PopularityTracker::new();
        let now = Utc::now();
        let k = key("docker");

        tracker.record_hit(&k, now);

        let record = tracker.record(&k).unwrap();
        assert_eq!(record.hits, 1);
        assert_eq!(record.first_seen, now);
        assert_eq!(record.last_seen, now);
    }

    #[test]
    fn test_later_hits_increment_and_update_last_seen() {
        let mut tracker = PopularityTracker::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let k = key("docker");

        tracker.record_hit(&k, t0);
        tracker.record_hit(&k, t1);

        let record = tracker.record(&k).unwrap();
        assert_eq!(record.hits, 2);
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_seen, t1);
    }

    #[test]
    fn test_unknown_key_classified_rare() {
        let policy = test_policy();
        assert_eq!(policy.classify(None, Utc::now()), TtlTier::Rare);
    }

    #[test]
    fn test_single_hit_classified_rare() {
        let policy = test_policy();
        let now = Utc::now();
        let record = PopularityRecord {
            hits: 1,
            first_seen: now,
            last_seen: now,
        };
        assert_eq!(policy.classify(Some(&record), now), TtlTier::Rare);
    }

    #[test]
    fn test_standard_threshold() {
        let policy = test_policy();
        let now = Utc::now();
        let record = PopularityRecord {
            hits: 3,
            first_seen: now,
            last_seen: now,
        };
        assert_eq!(policy.classify(Some(&record), now), TtlTier::Standard);
    }

    #[test]
    fn test_popular_requires_observation_window() {
        let policy = test_policy();
        let now = Utc::now();

        // Plenty of hits, but all within a burst: not yet Popular
        let burst = PopularityRecord {
            hits: 100,
            first_seen: now,
            last_seen: now,
        };
        assert_eq!(policy.classify(Some(&burst), now), TtlTier::Standard);

        // Same hit count observed over a long enough window
        let sustained = PopularityRecord {
            hits: 100,
            first_seen: now - Duration::hours(1),
            last_seen: now,
        };
        assert_eq!(policy.classify(Some(&sustained), now), TtlTier::Popular);
    }

    #[test]
    fn test_tier_monotone_in_hit_count() {
        let policy = test_policy();
        let now = Utc::now();
        let first_seen = now - Duration::hours(1);

        let low = PopularityRecord {
            hits: 10,
            first_seen,
            last_seen: now,
        };
        let high = PopularityRecord {
            hits: 100,
            first_seen,
            last_seen: now,
        };

        // More hits at the same age never yield a lower tier
        assert!(
            policy.classify(Some(&high), now) >= policy.classify(Some(&low), now)
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let policy = test_policy();
        let now = Utc::now();
        let record = PopularityRecord {
            hits: 42,
            first_seen: now - Duration::hours(2),
            last_seen: now,
        };
        let first = policy.classify(Some(&record), now);
        let second = policy.classify(Some(&record), now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ttl_increases_with_tier() {
        let policy = test_policy();
        assert!(policy.ttl_for(TtlTier::Rare) <= policy.ttl_for(TtlTier::Standard));
        assert!(policy.ttl_for(TtlTier::Standard) <= policy.ttl_for(TtlTier::Popular));
    }

    #[test]
    fn test_prune_removes_stale_records() {
        let mut tracker = PopularityTracker::new();
        let now = Utc::now();

        tracker.record_hit(&key("stale"), now - Duration::hours(48));
        tracker.record_hit(&key("fresh"), now - Duration::hours(1));

        let removed = tracker.prune(StdDuration::from_secs(24 * 3600), now);
        assert_eq!(removed, 1);
        assert!(tracker.record(&key("stale")).is_none());
        assert!(tracker.record(&key("fresh")).is_some());
    }

    #[test]
    fn test_histogram_counts_tiers() {
        let mut tracker = PopularityTracker::new();
        let policy = test_policy();
        let now = Utc::now();
        let old = now - Duration::hours(1);

        // Rare: one hit
        tracker.record_hit(&key("rare"), now);
        // Standard: three hits
        for _ in 0..3 {
            tracker.record_hit(&key("standard"), now);
        }
        // Popular: many hits over a long window
        tracker.record_hit(&key("popular"), old);
        for _ in 0..10 {
            tracker.record_hit(&key("popular"), now);
        }

        let histogram = tracker.histogram(&policy, now);
        assert_eq!(
            histogram,
            TierHistogram {
                popular: 1,
                standard: 1,
                rare: 1,
            }
        );
    }
}
