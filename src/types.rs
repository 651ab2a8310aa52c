use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A search or recommendation request against the skill registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillQuery {
    /// Natural language query text
    pub query: String,
    /// Optional metadata filters (e.g. language, category, license).
    /// Kept as a BTreeMap so filter key order never affects cache keys.
    pub filters: Option<BTreeMap<String, Value>>,
    /// Maximum number of results to return
    pub limit: u32,
    /// Pagination offset
    pub offset: u32,
}

impl SkillQuery {
    /// Convenience constructor for an unfiltered query
    pub fn new(query: impl Into<String>, limit: u32, offset: u32) -> Self {
        Self {
            query: query.into(),
            filters: None,
            limit,
            offset,
        }
    }

    /// Attach a filter set to the query
    pub fn with_filters(mut self, filters: BTreeMap<String, Value>) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// A single skill package matched by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillHit {
    /// Registry-assigned skill identifier
    pub skill_id: Uuid,
    /// Skill package name (e.g. "docker-compose-helper")
    pub name: String,
    /// Short description shown in search listings
    pub description: String,
    /// Source repository URL
    pub repository: String,
    /// Composite quality score (0.0 to 1.0)
    pub quality_score: f32,
    /// Relevance score for this query (0.0 to 1.0)
    pub relevance: f32,
    /// When the skill was last indexed
    pub indexed_at: DateTime<Utc>,
}

/// A complete result set for one query, as produced by the search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matched skills, ordered by relevance
    pub results: Vec<SkillHit>,
    /// Total number of matches before pagination
    pub total_count: u64,
}

impl SearchResults {
    /// An empty result set
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
        }
    }
}

/// Boundary trait for the expensive search/recommendation computation.
///
/// The cache never knows how results are produced; the registry's search
/// engine implements this and the background refresher calls it to recompute
/// near-expiry entries. Implementations should assume calls are slow
/// (network/database I/O) and may run concurrently for different queries.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Compute fresh results for a query
    async fn search(&self, query: &SkillQuery) -> anyhow::Result<SearchResults>;
}
