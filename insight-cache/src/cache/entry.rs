//! Cache entry with lazy TTL expiry

use crate::cache::types::{CacheKey, CacheValue, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached payload together with the bookkeeping needed to expire it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// When the entry was first written
    pub created_at: DateTime<Utc>,

    /// Lifetime in seconds, measured from `created_at`
    pub ttl_seconds: u64,

    /// Tier currently holding the entry
    pub tier: Tier,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(key: CacheKey, value: CacheValue, ttl: Duration, tier: Tier) -> Self {
        Self {
            key,
            value,
            created_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
            tier,
        }
    }

    /// Check if the entry has expired (`now - created_at > ttl`)
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.created_at).num_milliseconds();
        age_ms > (self.ttl_seconds as i64).saturating_mul(1000)
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let expires_at = self.created_at + chrono::Duration::seconds(self.ttl_seconds as i64);
        (expires_at - Utc::now()).to_std().ok()
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// The same entry relocated to another tier
    pub fn in_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(
            "test_key".to_string(),
            "test_value".to_string(),
            Duration::from_secs(3600),
            Tier::Primary,
        );

        assert_eq!(entry.key, "test_key");
        assert_eq!(entry.ttl_seconds, 3600);
        assert!(!entry.is_expired());
        assert!(entry.remaining_ttl().is_some());
    }

    #[test]
    fn test_expiry_boundary() {
        let mut entry = CacheEntry::new(
            "k".to_string(),
            "v".to_string(),
            Duration::from_secs(10),
            Tier::Fallback,
        );
        let created = Utc::now();
        entry.created_at = created;

        assert!(!entry.is_expired_at(created + chrono::Duration::seconds(10)));
        assert!(entry.is_expired_at(created + chrono::Duration::milliseconds(10_001)));
    }

    #[test]
    fn test_zero_ttl_expires_immediately_after_creation() {
        let mut entry = CacheEntry::new(
            "k".to_string(),
            "v".to_string(),
            Duration::from_secs(0),
            Tier::Primary,
        );
        entry.created_at = Utc::now() - chrono::Duration::milliseconds(5);
        assert!(entry.is_expired());
        assert!(entry.remaining_ttl().is_none());
    }

    #[test]
    fn test_in_tier_keeps_creation_time() {
        let entry = CacheEntry::new(
            "k".to_string(),
            "v".to_string(),
            Duration::from_secs(60),
            Tier::Fallback,
        );
        let created = entry.created_at;
        let moved = entry.in_tier(Tier::Primary);
        assert_eq!(moved.tier, Tier::Primary);
        assert_eq!(moved.created_at, created);
    }

    #[test]
    fn test_entry_serialization() {
        let entry = CacheEntry::new(
            "k".to_string(),
            "{\"text\":\"hi\"}".to_string(),
            Duration::from_secs(60),
            Tier::Primary,
        );
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
