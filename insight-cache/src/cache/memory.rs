//! In-process tier
//!
//! Serves as the primary tier when no remote store is configured, and as a
//! controllable stand-in in tests: [`MemoryTier::set_available`] simulates an
//! outage.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::cache::entry::CacheEntry;
use crate::cache::tier::CacheTier;
use crate::cache::types::{CacheKey, Tier};
use crate::error::{CacheError, Result};

pub struct MemoryTier {
    role: Tier,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    available: AtomicBool,
}

impl MemoryTier {
    pub fn new(role: Tier) -> Self {
        Self {
            role,
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated reachability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Whether the key is stored, bypassing availability and expiry
    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    fn check(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CacheError::unavailable(self.role, "memory tier marked unavailable"))
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn role(&self) -> Tier {
        self.role
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.check()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.check()?;
        let stored = entry.clone().in_tier(self.role);
        self.entries.write().await.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        self.check()?;
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            "value".to_string(),
            Duration::from_secs(60),
            Tier::Fallback,
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let tier = MemoryTier::new(Tier::Primary);
        tier.put(&entry("a")).await.unwrap();

        let got = tier.get("a").await.unwrap().unwrap();
        assert_eq!(got.tier, Tier::Primary);

        tier.delete("a").await.unwrap();
        assert!(tier.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_tier_errors() {
        let tier = MemoryTier::new(Tier::Primary);
        tier.put(&entry("a")).await.unwrap();
        tier.set_available(false);

        let err = tier.get("a").await.unwrap_err();
        assert!(matches!(err, CacheError::TierUnavailable { tier: Tier::Primary, .. }));
        assert!(tier.put(&entry("b")).await.is_err());

        tier.set_available(true);
        assert_eq!(tier.clear().await.unwrap(), 1);
        assert!(tier.is_empty().await);
    }
}
