//! Error types for cache tier operations
//!
//! Reads and writes through [`TieredCache`](crate::cache::TieredCache) never
//! see these: the store absorbs every tier failure and degrades to the other
//! tier or to a miss. They surface from the tier implementations, from
//! configuration validation and from an administrative clear that times out.

use thiserror::Error;

use crate::cache::types::Tier;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The tier backend could not be reached
    #[error("{tier} tier unavailable: {reason}")]
    TierUnavailable { tier: Tier, reason: String },

    /// A tier operation exceeded its deadline
    #[error("{tier} tier timed out after {timeout_ms}ms")]
    Timeout { tier: Tier, timeout_ms: u64 },

    /// A full clear could not acquire exclusive access in time
    #[error("cache clear gave up waiting for in-flight operations after {timeout_ms}ms")]
    ClearTimeout { timeout_ms: u64 },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error from the durable tier
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn unavailable(tier: Tier, reason: impl Into<String>) -> Self {
        CacheError::TierUnavailable {
            tier,
            reason: reason.into(),
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::unavailable(Tier::Primary, e.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
