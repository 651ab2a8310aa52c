//! Adaptive tiered result cache for the skill-registry search backend.
//!
//! Sits in front of the registry's expensive search/recommendation
//! computation, classifies queries by popularity to pick a TTL tier, and
//! proactively refreshes hot entries in the background without duplicate
//! concurrent work. Single-process and in-memory: a best-effort,
//! staleness-bounded accelerator, never a source of truth.

pub mod cache;
pub mod config;
pub mod error;
pub mod types;

pub use cache::{
    BoundedStore, CacheEntry, CacheKey, CacheManager, CacheStats, InvalidationSubscription,
    KeyCodec, PopularityRecord, PopularityTracker, PruneReport, RefreshCoordinator, ResultStore,
    StoreStats, TierHistogram, TierPolicy, TieredStats, TieredStore, TtlTier,
};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use types::{SearchBackend, SearchResults, SkillHit, SkillQuery};
