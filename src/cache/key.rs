/// Deterministic, reversible cache key derivation
///
/// Every cached result set is addressed by a single string key derived from
/// the request. Two semantically equal requests (same normalized query text,
/// same filter set regardless of insertion order, same pagination) always
/// produce byte-identical keys, and the key can be decoded back into a
/// request so the background refresher can recompute it.
use crate::error::{CacheError, CacheResult};
use crate::types::SkillQuery;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

const KEY_PREFIX: &str = "search:";

/// Opaque cache key. Produced only by [`KeyCodec::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a raw key string. Intended for tests and for callers that
    /// persist keys they previously obtained from `encode`.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoder/decoder between [`SkillQuery`] and [`CacheKey`]
pub struct KeyCodec;

impl KeyCodec {
    /// Normalize query text: case-fold, trim, collapse internal whitespace
    /// runs to a single space
    pub fn normalize_query(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Escape the query segment so it cannot contain the `:` separator.
    /// `%` is escaped first so the sequence stays reversible.
    fn escape_query(query: &str) -> String {
        let mut escaped = String::with_capacity(query.len());
        for c in query.chars() {
            match c {
                '%' => escaped.push_str("%25"),
                ':' => escaped.push_str("%3a"),
                _ => escaped.push(c),
            }
        }
        escaped
    }

    /// Reverse [`escape_query`](Self::escape_query). `%3a` is restored
    /// before `%25` so a literal `%3a` in the original text survives.
    fn unescape_query(escaped: &str) -> String {
        escaped.replace("%3a", ":").replace("%25", "%")
    }

    /// Encode a request as a cache key.
    ///
    /// Format: `search:<query>:<filtersJSON>:<limit>:<offset>`. The query
    /// segment is escaped so query text containing `:` never collides with
    /// the segment separators. The filter segment is empty when no filters
    /// are set. Filter keys are sorted by the BTreeMap representation, so
    /// the caller's insertion order never affects the key.
    pub fn encode(query: &SkillQuery) -> CacheKey {
        let normalized = Self::escape_query(&Self::normalize_query(&query.query));

        let filters = match &query.filters {
            // BTreeMap serialization is already lexicographic by key
            Some(f) => serde_json::to_string(f).unwrap_or_default(),
            None => String::new(),
        };

        CacheKey(format!(
            "{}{}:{}:{}:{}",
            KEY_PREFIX, normalized, filters, query.limit, query.offset
        ))
    }

    /// Decode a cache key back into the request it was derived from.
    ///
    /// Accepts keys with an empty filter segment. Returns
    /// [`CacheError::KeyDecode`] for any string not matching the
    /// four-segment shape. A filter segment that is present but not valid
    /// JSON degrades to `filters = None` rather than failing the decode.
    pub fn decode(key: &CacheKey) -> CacheResult<SkillQuery> {
        let body = key
            .0
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| CacheError::KeyDecode(format!("missing '{}' prefix", KEY_PREFIX)))?;

        // The last two segments are always the integer pagination suffix
        let mut tail = body.rsplitn(3, ':');
        let offset_str = tail
            .next()
            .ok_or_else(|| CacheError::KeyDecode("missing offset segment".to_string()))?;
        let limit_str = tail
            .next()
            .ok_or_else(|| CacheError::KeyDecode("missing limit segment".to_string()))?;
        let head = tail
            .next()
            .ok_or_else(|| CacheError::KeyDecode("missing query segment".to_string()))?;

        let offset: u32 = offset_str
            .parse()
            .map_err(|_| CacheError::KeyDecode(format!("invalid offset: {:?}", offset_str)))?;
        let limit: u32 = limit_str
            .parse()
            .map_err(|_| CacheError::KeyDecode(format!("invalid limit: {:?}", limit_str)))?;

        // Split <query>:<filtersJSON>. The escaped query segment cannot
        // contain ':', so the first ':' in the head is the separator.
        let (query, filters_str) = head.split_once(':').ok_or_else(|| {
            CacheError::KeyDecode("missing filters segment".to_string())
        })?;

        let filters = if filters_str.is_empty() {
            None
        } else {
            match serde_json::from_str::<BTreeMap<String, Value>>(filters_str) {
                Ok(f) => Some(f),
                Err(e) => {
                    debug!("Filter segment is not valid JSON, dropping filters: {}", e);
                    None
                }
            }
        };

        Ok(SkillQuery {
            query: Self::unescape_query(query),
            filters,
            limit,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_encode_is_deterministic() {
        let query = SkillQuery::new("docker compose", 20, 0)
            .with_filters(filters(&[("language", json!("rust"))]));

        let key1 = KeyCodec::encode(&query);
        let key2 = KeyCodec::encode(&query);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_query_normalization() {
        let a = KeyCodec::encode(&SkillQuery::new("  Docker   Compose  ", 20, 0));
        let b = KeyCodec::encode(&SkillQuery::new("docker compose", 20, 0));
        assert_eq!(a, b);

        let c = KeyCodec::encode(&SkillQuery::new("docker\tcompose", 20, 0));
        assert_eq!(a, c);
    }

    #[test]
    fn test_filter_order_does_not_affect_key() {
        // BTreeMap sorts keys, so insertion order is irrelevant
        let mut f1 = BTreeMap::new();
        f1.insert("language".to_string(), json!("rust"));
        f1.insert("category".to_string(), json!("devops"));

        let mut f2 = BTreeMap::new();
        f2.insert("category".to_string(), json!("devops"));
        f2.insert("language".to_string(), json!("rust"));

        let a = KeyCodec::encode(&SkillQuery::new("docker", 20, 0).with_filters(f1));
        let b = KeyCodec::encode(&SkillQuery::new("docker", 20, 0).with_filters(f2));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_requests_produce_different_keys() {
        let a = KeyCodec::encode(&SkillQuery::new("docker", 20, 0));
        let b = KeyCodec::encode(&SkillQuery::new("kubernetes", 20, 0));
        let c = KeyCodec::encode(&SkillQuery::new("docker", 20, 20));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_round_trip_with_filters() {
        let query = SkillQuery::new("docker compose", 20, 40).with_filters(filters(&[
            ("category", json!("devops")),
            ("language", json!("rust")),
            ("min_score", json!(0.5)),
        ]));

        let decoded = KeyCodec::decode(&KeyCodec::encode(&query)).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_round_trip_with_nested_filter_values() {
        let query = SkillQuery::new("docker", 10, 0)
            .with_filters(filters(&[("tags", json!({"any": ["ci", "cd"]}))]));

        let decoded = KeyCodec::decode(&KeyCodec::encode(&query)).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_empty_filters_round_trip() {
        // Regression: earlier key formats required at least one filter
        // character and broke on filter-less requests
        let query = SkillQuery::new("docker", 20, 0);
        let key = KeyCodec::encode(&query);
        assert_eq!(key.as_str(), "search:docker::20:0");

        let decoded = KeyCodec::decode(&key).unwrap();
        assert_eq!(decoded.filters, None);
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_query_containing_colons_round_trips() {
        let query = SkillQuery::new("feature: auth", 20, 0);
        let decoded = KeyCodec::decode(&KeyCodec::encode(&query)).unwrap();
        assert_eq!(decoded.query, "feature: auth");
        assert_eq!(decoded.filters, None);
    }

    #[test]
    fn test_query_containing_colon_brace_round_trips() {
        // Query text that looks like the start of a filter segment must not
        // be mistaken for one
        let query = SkillQuery::new("deploy:{prod}", 20, 0);
        let decoded = KeyCodec::decode(&KeyCodec::encode(&query)).unwrap();
        assert_eq!(decoded.query, "deploy:{prod}");
        assert_eq!(decoded.filters, None);
    }

    #[test]
    fn test_query_containing_colon_brace_round_trips_with_filters() {
        let query = SkillQuery::new("deploy:{prod}", 20, 0)
            .with_filters(filters(&[("env", json!("prod"))]));
        let decoded = KeyCodec::decode(&KeyCodec::encode(&query)).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_query_containing_literal_escape_sequences_round_trips() {
        let query = SkillQuery::new("100%25 match %3a done", 20, 0);
        let decoded = KeyCodec::decode(&KeyCodec::encode(&query)).unwrap();
        assert_eq!(decoded.query, "100%25 match %3a done");
    }

    #[test]
    fn test_decode_rejects_malformed_shape() {
        assert!(KeyCodec::decode(&CacheKey::from_raw("nonsense")).is_err());
        assert!(KeyCodec::decode(&CacheKey::from_raw("search:docker")).is_err());
        // Missing filter segment entirely
        assert!(KeyCodec::decode(&CacheKey::from_raw("search:docker:20:0")).is_err());
        // Non-numeric pagination
        assert!(KeyCodec::decode(&CacheKey::from_raw("search:docker::x:0")).is_err());
        assert!(KeyCodec::decode(&CacheKey::from_raw("search:docker::20:y")).is_err());
    }

    #[test]
    fn test_malformed_filter_json_degrades_to_none() {
        let key = CacheKey::from_raw("search:docker:{not json}:20:0");
        let decoded = KeyCodec::decode(&key).unwrap();
        assert_eq!(decoded.query, "docker");
        assert_eq!(decoded.filters, None);
        assert_eq!(decoded.limit, 20);
        assert_eq!(decoded.offset, 0);
    }
}
