//! Storage tier abstraction

use async_trait::async_trait;

use crate::cache::entry::CacheEntry;
use crate::cache::types::Tier;
use crate::error::Result;

/// One layer of the cache
///
/// Implementations report unreachability as
/// [`CacheError::TierUnavailable`](crate::error::CacheError::TierUnavailable);
/// deciding what to do about it is the store's job.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short name used in logs and stats (`redis`, `file`, `memory`)
    fn name(&self) -> &'static str;

    /// Role this tier plays in the store
    fn role(&self) -> Tier;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key owned by this tier, returning how many were dropped
    async fn clear(&self) -> Result<usize>;

    /// Persist the instant (nanos since the Unix epoch) of the latest clear.
    /// Tiers without durable storage keep nothing.
    async fn save_clear_mark(&self, _cleared_at: i64) -> Result<()> {
        Ok(())
    }

    /// Instant of the latest clear saved by [`CacheTier::save_clear_mark`]
    async fn load_clear_mark(&self) -> Result<Option<i64>> {
        Ok(None)
    }
}
