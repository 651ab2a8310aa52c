use thiserror::Error;

/// Main error type for the cache layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// A cache key did not match the expected encoded shape
    #[error("Key decode error: {0}")]
    KeyDecode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Check if the error came from key decoding
    pub fn is_key_decode(&self) -> bool {
        matches!(self, CacheError::KeyDecode(_))
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
