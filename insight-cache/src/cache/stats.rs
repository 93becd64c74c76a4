//! Process-wide cache counters
//!
//! All mutation goes through atomic increments so concurrent queries never
//! lose an update. [`StatsRecorder::reset`] is only called by the store while
//! it holds its clear gate exclusively, which keeps a reset from interleaving
//! with a lookup.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::types::CacheStats;

#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    saves: AtomicU64,
    degraded_writes: AtomicU64,
    degraded_reads: AtomicU64,
    promotions: AtomicU64,
    provider_failures: DashMap<String, u64>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_write(&self) {
        self.degraded_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_read(&self) {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a soft failure (rate limit, timeout, error) of a research provider
    pub fn record_provider_failure(&self, provider: &str) {
        *self
            .provider_failures
            .entry(provider.to_string())
            .or_insert(0) += 1;
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.saves.store(0, Ordering::Relaxed);
        self.degraded_writes.store(0, Ordering::Relaxed);
        self.degraded_reads.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.provider_failures.clear();
    }

    pub fn snapshot(&self, enabled: bool, backend: &str) -> CacheStats {
        let provider_failures: BTreeMap<String, u64> = self
            .provider_failures
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        CacheStats {
            enabled,
            backend: backend.to_string(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            degraded_writes: self.degraded_writes.load(Ordering::Relaxed),
            degraded_reads: self.degraded_reads.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            provider_failures,
        }
    }
}
