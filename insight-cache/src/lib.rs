//! # Insight Cache (insight-cache)
//!
//! Outage-tolerant response cache for the insight query pipeline.
//!
//! ## Features
//!
//! - Two tiers: a shared Redis primary and a local file fallback
//! - Transparent degradation when the primary is unreachable
//! - Promotion of fallback entries once the primary recovers
//! - Exact TTL expiry, applied lazily on read
//! - Process-wide hit/miss/eviction counters, including research provider failures
//! - Content fingerprints so equivalent queries share an entry
//!
//! ## Example
//!
//! ```no_run
//! use insight_cache::{CacheConfig, Fingerprint, PayloadKind, TieredCache, TtlClass};
//!
//! # async fn example() -> insight_cache::Result<()> {
//! let cache = TieredCache::from_config(CacheConfig::file_only(".cache")).await?;
//!
//! let key = Fingerprint::new(PayloadKind::Answer)
//!     .query("What is our churn rate?")
//!     .strategy("hybrid")
//!     .build();
//!
//! cache.put(&key, "42%".to_string(), TtlClass::Agent.duration()).await;
//! assert_eq!(cache.get(&key).await.as_deref(), Some("42%"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    normalize_query, CacheBackend, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey,
    CacheStats, CacheTier, CacheValue, ClearReport, FileTier, Fingerprint, Invalidation,
    MemoryTier, PayloadKind, RedisTier, StatsRecorder, Tier, TieredCache, TtlClass,
};
pub use error::{CacheError, Result};
