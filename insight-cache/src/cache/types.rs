//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cache key type - a fingerprint produced by [`Fingerprint`](crate::cache::Fingerprint)
pub type CacheKey = String;

/// Cache value type - an opaque serialized payload
pub type CacheValue = String;

/// Cache tier holding an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Fast tier, usually remote and shared across instances
    Primary,

    /// Durable local tier used while the primary is unreachable
    Fallback,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Fallback => write!(f, "fallback"),
        }
    }
}

/// Point-in-time view of the process-wide cache counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Whether caching is enabled at all
    pub enabled: bool,

    /// Human readable tier layout, e.g. `redis+file`
    pub backend: String,

    /// Total number of cache hits (either tier)
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Entries dropped because their TTL elapsed
    pub evictions: u64,

    /// Successful writes
    pub saves: u64,

    /// Writes that landed in the fallback tier because the primary was unreachable
    pub degraded_writes: u64,

    /// Reads that could not consult the primary tier
    pub degraded_reads: u64,

    /// Fallback entries copied back into the primary tier
    pub promotions: u64,

    /// Soft failures per research provider
    pub provider_failures: BTreeMap<String, u64>,
}

impl CacheStats {
    /// Total lookups observed
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Sum of all provider failures
    pub fn total_provider_failures(&self) -> u64 {
        self.provider_failures.values().sum()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ backend: {}, hits: {}, misses: {}, hit_rate: {:.2}%, evictions: {}, degraded_writes: {} }}",
            self.backend,
            self.hits,
            self.misses,
            self.hit_rate(),
            self.evictions,
            self.degraded_writes
        )
    }
}
