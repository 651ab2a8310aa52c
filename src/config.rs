use crate::error::{CacheError, CacheResult};
use std::time::Duration;

/// Configuration for the tiered result cache.
///
/// All recognized options live here with explicit defaults and are validated
/// once at construction; nothing is re-checked on the hot path.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the L1 (fast) store
    pub l1_max_entries: usize,
    /// Maximum number of entries in the L2 (large) store.
    /// `None` runs the cache L1-only.
    pub l2_max_entries: Option<usize>,
    /// TTL for entries classified Rare
    pub rare_ttl: Duration,
    /// TTL for entries classified Standard
    pub standard_ttl: Duration,
    /// TTL for entries classified Popular
    pub popular_ttl: Duration,
    /// Hit count at which a key is promoted from Rare to Standard
    pub standard_hit_threshold: u64,
    /// Hit count at which a key becomes eligible for Popular
    pub popular_hit_threshold: u64,
    /// Minimum age a popularity record must reach before a key can be
    /// classified Popular, so a single burst of hits is not mistaken for
    /// durable popularity
    pub min_observation_window: Duration,
    /// How long a popularity record may go without hits before pruning
    pub popularity_max_age: Duration,
    /// Interval between background refresh ticks
    pub refresh_interval: Duration,
    /// Entries expiring within this window are candidates for refresh
    pub refresh_lookahead: Duration,
    /// Maximum number of refresh callbacks in flight at once
    pub max_concurrent_refreshes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 100,
            l2_max_entries: Some(1000),
            rare_ttl: Duration::from_secs(60),            // 1 minute
            standard_ttl: Duration::from_secs(30 * 60),   // 30 minutes
            popular_ttl: Duration::from_secs(4 * 3600),   // 4 hours
            standard_hit_threshold: 3,
            popular_hit_threshold: 10,
            min_observation_window: Duration::from_secs(10 * 60), // 10 minutes
            popularity_max_age: Duration::from_secs(24 * 3600),   // 24 hours
            refresh_interval: Duration::from_secs(60),
            refresh_lookahead: Duration::from_secs(5 * 60),
            max_concurrent_refreshes: 4,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration
    pub fn validate(&self) -> CacheResult<()> {
        if self.l1_max_entries == 0 {
            return Err(CacheError::Config(
                "l1_max_entries must be greater than 0".to_string(),
            ));
        }

        if let Some(l2) = self.l2_max_entries {
            if l2 == 0 {
                return Err(CacheError::Config(
                    "l2_max_entries must be greater than 0 when set".to_string(),
                ));
            }
        }

        if self.rare_ttl.is_zero() {
            return Err(CacheError::Config(
                "rare_ttl must be greater than 0".to_string(),
            ));
        }

        // Tier TTLs must be monotone: a hotter tier never gets a shorter TTL
        if self.standard_ttl < self.rare_ttl {
            return Err(CacheError::Config(
                "standard_ttl must not be shorter than rare_ttl".to_string(),
            ));
        }

        if self.popular_ttl < self.standard_ttl {
            return Err(CacheError::Config(
                "popular_ttl must not be shorter than standard_ttl".to_string(),
            ));
        }

        if self.popular_hit_threshold < self.standard_hit_threshold {
            return Err(CacheError::Config(
                "popular_hit_threshold must not be below standard_hit_threshold".to_string(),
            ));
        }

        if self.refresh_interval.is_zero() {
            return Err(CacheError::Config(
                "refresh_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_refreshes == 0 {
            return Err(CacheError::Config(
                "max_concurrent_refreshes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_l1_capacity_rejected() {
        let config = CacheConfig {
            l1_max_entries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_monotonicity_enforced() {
        let config = CacheConfig {
            rare_ttl: Duration::from_secs(3600),
            standard_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            standard_ttl: Duration::from_secs(3600),
            popular_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let config = CacheConfig {
            standard_hit_threshold: 50,
            popular_hit_threshold: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_l1_only_mode_accepted() {
        let config = CacheConfig {
            l2_max_entries: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
