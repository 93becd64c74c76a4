//! # Tiered Caching Layer
//!
//! Model answers and research results are cached behind a
//! fingerprint of the normalized query and the routing strategy that was
//! requested.
//!
//! ## Architecture
//!
//! - [`TieredCache`] drives every operation across the tiers
//! - [`CacheTier`] is the storage seam; [`RedisTier`], [`FileTier`] and
//!   [`MemoryTier`] implement it
//! - [`StatsRecorder`] keeps lock-free counters shared by all callers
//!
//! Tier failures are logged and counted, never surfaced: a cache that
//! cannot be reached behaves like a cache that misses.

pub mod config;
pub mod entry;
pub mod file;
pub mod fingerprint;
pub mod memory;
pub mod redis;
pub mod stats;
pub mod store;
pub mod tier;
pub mod types;

pub use config::{CacheBackend, CacheConfig, CacheConfigBuilder, TtlClass};
pub use entry::CacheEntry;
pub use file::FileTier;
pub use fingerprint::{normalize_query, Fingerprint, PayloadKind};
pub use memory::MemoryTier;
pub use self::redis::RedisTier;
pub use stats::StatsRecorder;
pub use store::{ClearReport, Invalidation, TieredCache};
pub use tier::CacheTier;
pub use types::{CacheKey, CacheStats, CacheValue, Tier};
