//! Tiered cache store
//!
//! Every operation is a small state machine over the configured tiers:
//! try the primary, and on unavailability or a miss move on to the fallback.
//! Tier failures never escape to the caller; they degrade the operation and
//! are counted in [`CacheStats`].
//!
//! Reads, writes and stats snapshots hold the shared side of a gate, and
//! [`TieredCache::clear`] takes the exclusive side. A reader therefore sees
//! the store either entirely before or entirely after a clear.
//!
//! A key written to the fallback while the primary was down may still have an
//! older copy in the primary. Such keys are remembered until the newer copy
//! is promoted or overwritten, and reads of them prefer the newest entry.

use chrono::Utc;
use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::config::{CacheBackend, CacheConfig};
use crate::cache::entry::CacheEntry;
use crate::cache::file::FileTier;
use crate::cache::redis::RedisTier;
use crate::cache::stats::StatsRecorder;
use crate::cache::tier::CacheTier;
use crate::cache::types::{CacheStats, CacheValue, Tier};
use crate::error::{CacheError, Result};

const NEVER_CLEARED: i64 = i64::MIN;

/// Target of an invalidation
#[derive(Debug, Clone, Copy)]
pub enum Invalidation<'a> {
    Key(&'a str),
    All,
}

/// Outcome of a full clear
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    /// Entries physically removed from reachable tiers
    pub removed: usize,

    /// Tiers that could not be reached; their old entries are masked instead
    pub unreachable: Vec<Tier>,
}

enum Lookup {
    Hit(CacheEntry),
    Miss,
    Unavailable,
}

/// Two-tier cache with lazy expiry and transparent degradation
pub struct TieredCache {
    config: CacheConfig,
    primary: Option<Arc<dyn CacheTier>>,
    fallback: Option<Arc<dyn CacheTier>>,
    stats: Arc<StatsRecorder>,
    gate: Arc<RwLock<()>>,
    /// Bumped on every clear; pending promotions started before it are dropped
    epoch: Arc<AtomicU64>,
    /// Entries created before this instant (nanos since epoch) are treated as absent
    cleared_at: AtomicI64,
    /// Keys whose latest write landed in the fallback tier only
    degraded_keys: Arc<DashSet<String>>,
}

impl TieredCache {
    /// Assemble a store from explicit tiers
    pub fn new(
        config: CacheConfig,
        primary: Option<Arc<dyn CacheTier>>,
        fallback: Option<Arc<dyn CacheTier>>,
    ) -> Self {
        Self {
            config,
            primary,
            fallback,
            stats: Arc::new(StatsRecorder::new()),
            gate: Arc::new(RwLock::new(())),
            epoch: Arc::new(AtomicU64::new(0)),
            cleared_at: AtomicI64::new(NEVER_CLEARED),
            degraded_keys: Arc::new(DashSet::new()),
        }
    }

    /// Build the tiers described by `config`
    ///
    /// With `tiered-remote` the Redis connection is not required to be up:
    /// the store starts degraded and promotes fallback entries once the
    /// primary answers again.
    pub async fn from_config(config: CacheConfig) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;

        if !config.enabled {
            info!("Cache disabled by configuration");
            return Ok(Self::new(config, None, None));
        }

        let fallback: Arc<dyn CacheTier> =
            Arc::new(FileTier::open(&config.cache_dir, Tier::Fallback).await?);

        let primary: Option<Arc<dyn CacheTier>> = match config.backend {
            CacheBackend::TieredRemote => Some(Arc::new(RedisTier::new(
                &config.redis_url,
                config.namespace.clone(),
                config.tier_timeout,
            )?)),
            CacheBackend::FileOnly => None,
        };

        let cache = Self::new(config, primary, Some(fallback));
        cache.restore_clear_mark().await;
        info!("Initialized cache: {}", cache.backend_name());
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && (self.primary.is_some() || self.fallback.is_some())
    }

    /// Tier layout, e.g. `redis+file`
    pub fn backend_name(&self) -> String {
        match (&self.primary, &self.fallback) {
            (Some(p), Some(f)) => format!("{}+{}", p.name(), f.name()),
            (Some(p), None) => p.name().to_string(),
            (None, Some(f)) => f.name().to_string(),
            (None, None) => "disabled".to_string(),
        }
    }

    /// Look a key up, primary tier first
    ///
    /// A fallback hit counts as a hit and schedules a best-effort promotion
    /// of the entry into the primary tier.
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        if !self.is_enabled() {
            return None;
        }
        let _gate = self.gate.read().await;

        let mut primary_reachable = true;
        if let Some(primary) = &self.primary {
            match self.look_up(primary, key).await {
                Lookup::Hit(entry) => {
                    let entry = if self.degraded_keys.contains(key) {
                        match self.newest_after_outage(entry, key).await {
                            Some(entry) => entry,
                            None => {
                                self.stats.record_miss();
                                return None;
                            }
                        }
                    } else {
                        entry
                    };
                    debug!("Cache hit ({}): {}", entry.tier, key);
                    self.stats.record_hit();
                    return Some(entry.value);
                }
                Lookup::Miss => {}
                Lookup::Unavailable => {
                    self.stats.record_degraded_read();
                    primary_reachable = false;
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if let Lookup::Hit(entry) = self.look_up(fallback, key).await {
                debug!("Cache hit (fallback): {}", key);
                self.stats.record_hit();
                if primary_reachable && self.primary.is_some() {
                    self.schedule_promotion(entry.clone());
                }
                return Some(entry.value);
            }
        }

        debug!("Cache miss: {}", key);
        self.stats.record_miss();
        None
    }

    /// Store a value, degrading to the fallback tier if the primary is unreachable
    pub async fn put(&self, key: &str, value: CacheValue, ttl: Duration) {
        if !self.is_enabled() {
            return;
        }
        let _gate = self.gate.read().await;

        let entry = CacheEntry::new(key.to_string(), value, ttl, Tier::Primary);

        if let Some(primary) = &self.primary {
            match self.with_deadline(Tier::Primary, primary.put(&entry)).await {
                Ok(()) => {
                    self.stats.record_save();
                    self.degraded_keys.remove(key);
                    // Keep the key authoritative in exactly one tier.
                    if let Some(fallback) = &self.fallback {
                        if let Err(e) = self.with_deadline(Tier::Fallback, fallback.delete(key)).await {
                            debug!("Could not drop fallback copy of {}: {}", key, e);
                        }
                    }
                    return;
                }
                Err(e) => {
                    warn!("Primary tier write failed for {} ({}); degrading to fallback", key, e);
                }
            }
        }

        let Some(fallback) = &self.fallback else {
            return;
        };
        let entry = entry.in_tier(Tier::Fallback);
        match self.with_deadline(Tier::Fallback, fallback.put(&entry)).await {
            Ok(()) => {
                self.stats.record_save();
                if self.primary.is_some() {
                    self.stats.record_degraded_write();
                    self.degraded_keys.insert(key.to_string());
                }
            }
            Err(e) => warn!("Cache write dropped for {}: {}", key, e),
        }
    }

    /// Read and decode a JSON payload
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring undecodable cached payload for {}: {}", key, e);
                None
            }
        }
    }

    /// Encode and store a JSON payload
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.put(key, raw, ttl).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
    }

    pub async fn invalidate(&self, target: Invalidation<'_>) -> Result<ClearReport> {
        match target {
            Invalidation::Key(key) => {
                self.invalidate_key(key).await;
                Ok(ClearReport::default())
            }
            Invalidation::All => self.clear().await,
        }
    }

    /// Remove one key from every tier, best effort
    pub async fn invalidate_key(&self, key: &str) {
        let _gate = self.gate.read().await;
        self.degraded_keys.remove(key);
        for tier in self.tiers() {
            if let Err(e) = self.with_deadline(tier.role(), tier.delete(key)).await {
                warn!("Could not invalidate {} in {} tier: {}", key, tier.role(), e);
            }
        }
    }

    /// Clear both tiers and reset the counters
    ///
    /// Waits at most `clear_timeout` for in-flight operations to drain.
    /// Entries in a tier that cannot be reached are masked: anything created
    /// before the clear reads as a miss. The clear instant is saved in every
    /// reachable durable tier so the mask outlives a restart.
    pub async fn clear(&self) -> Result<ClearReport> {
        let timeout = self.config.clear_timeout;
        let _gate = tokio::time::timeout(timeout, self.gate.write())
            .await
            .map_err(|_| CacheError::ClearTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })?;

        self.epoch.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.cleared_at.store(now, Ordering::SeqCst);
        self.degraded_keys.clear();

        let mut report = ClearReport::default();
        for tier in self.tiers() {
            match self.with_deadline(tier.role(), tier.clear()).await {
                Ok(count) => {
                    report.removed += count;
                    if let Err(e) = self.with_deadline(tier.role(), tier.save_clear_mark(now)).await {
                        warn!("Could not save clear mark in {} tier: {}", tier.role(), e);
                    }
                }
                Err(e) => {
                    warn!("Could not clear {} tier: {}; masking its entries", tier.role(), e);
                    report.unreachable.push(tier.role());
                }
            }
        }

        self.stats.reset();
        info!("Cleared {} entries from cache", report.removed);
        Ok(report)
    }

    /// Snapshot of the counters
    pub async fn stats(&self) -> CacheStats {
        let _gate = self.gate.read().await;
        self.stats.snapshot(self.is_enabled(), &self.backend_name())
    }

    /// Count a research provider failure against the shared stats
    pub async fn record_provider_failure(&self, provider: &str) {
        let _gate = self.gate.read().await;
        self.stats.record_provider_failure(provider);
    }

    /// Adopt the latest clear instant saved by any reachable tier
    async fn restore_clear_mark(&self) {
        for tier in self.tiers() {
            match self.with_deadline(tier.role(), tier.load_clear_mark()).await {
                Ok(Some(mark)) => {
                    self.cleared_at.fetch_max(mark, Ordering::SeqCst);
                }
                Ok(None) => {}
                Err(e) => debug!("No clear mark from {} tier: {}", tier.role(), e),
            }
        }
    }

    /// Pick between the primary's copy of a degraded key and the fallback's
    ///
    /// The fallback holds the most recent write. If that write is gone
    /// (expired or evicted) the primary's copy is older still and is dropped.
    async fn newest_after_outage(&self, primary_entry: CacheEntry, key: &str) -> Option<CacheEntry> {
        let Some(fallback) = &self.fallback else {
            return Some(primary_entry);
        };
        match self.look_up(fallback, key).await {
            Lookup::Hit(entry) if entry.created_at > primary_entry.created_at => {
                self.schedule_promotion(entry.clone());
                Some(entry)
            }
            Lookup::Hit(_) => {
                self.degraded_keys.remove(key);
                Some(primary_entry)
            }
            Lookup::Miss => {
                self.degraded_keys.remove(key);
                if let Some(primary) = &self.primary {
                    if let Err(e) = self.with_deadline(Tier::Primary, primary.delete(key)).await {
                        debug!("Could not drop superseded primary copy of {}: {}", key, e);
                    }
                }
                self.stats.record_eviction();
                None
            }
            // Fallback unreachable; the primary copy is all there is.
            Lookup::Unavailable => Some(primary_entry),
        }
    }

    fn tiers(&self) -> impl Iterator<Item = &Arc<dyn CacheTier>> {
        self.primary.iter().chain(self.fallback.iter())
    }

    fn masked_by_clear(&self, entry: &CacheEntry) -> bool {
        let cleared_at = self.cleared_at.load(Ordering::SeqCst);
        cleared_at != NEVER_CLEARED
            && entry
                .created_at
                .timestamp_nanos_opt()
                .map_or(true, |created| created < cleared_at)
    }

    async fn look_up(&self, tier: &Arc<dyn CacheTier>, key: &str) -> Lookup {
        match self.with_deadline(tier.role(), tier.get(key)).await {
            Ok(Some(entry)) => {
                if entry.is_expired() || self.masked_by_clear(&entry) {
                    debug!("Evicting stale entry {} from {} tier", key, tier.role());
                    self.stats.record_eviction();
                    if let Err(e) = self.with_deadline(tier.role(), tier.delete(key)).await {
                        debug!("Lazy eviction of {} failed: {}", key, e);
                    }
                    Lookup::Miss
                } else {
                    Lookup::Hit(entry)
                }
            }
            Ok(None) => Lookup::Miss,
            Err(e) => {
                warn!("{} tier read failed for {}: {}", tier.role(), key, e);
                Lookup::Unavailable
            }
        }
    }

    async fn with_deadline<T>(&self, tier: Tier, op: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.tier_timeout;
        match tokio::time::timeout(timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                tier,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn schedule_promotion(&self, entry: CacheEntry) {
        let Some(primary) = self.primary.clone() else {
            return;
        };
        let fallback = self.fallback.clone();
        let gate = Arc::clone(&self.gate);
        let epoch = Arc::clone(&self.epoch);
        let stats = Arc::clone(&self.stats);
        let degraded_keys = Arc::clone(&self.degraded_keys);
        let started_in = epoch.load(Ordering::SeqCst);
        let timeout = self.config.tier_timeout;

        tokio::spawn(async move {
            let _gate = gate.read().await;
            if epoch.load(Ordering::SeqCst) != started_in || entry.is_expired() {
                return;
            }

            let key = entry.key.clone();
            if let Ok(Ok(Some(existing))) = tokio::time::timeout(timeout, primary.get(&key)).await {
                if existing.created_at >= entry.created_at {
                    return;
                }
            }

            match tokio::time::timeout(timeout, primary.put(&entry.in_tier(Tier::Primary))).await {
                Ok(Ok(())) => {
                    stats.record_promotion();
                    degraded_keys.remove(&key);
                    debug!("Promoted {} to primary tier", key);
                    if let Some(fallback) = fallback {
                        let _ = tokio::time::timeout(timeout, fallback.delete(&key)).await;
                    }
                }
                Ok(Err(e)) => debug!("Promotion of {} failed: {}", key, e),
                Err(_) => debug!("Promotion of {} timed out", key),
            }
        });
    }
}
