//! Remote primary tier backed by Redis
//!
//! The connection is established lazily and re-established after a failure,
//! so a store that starts while Redis is down picks the primary tier back up
//! once it becomes reachable again.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::entry::CacheEntry;
use crate::cache::tier::CacheTier;
use crate::cache::types::Tier;
use crate::error::{CacheError, Result};

const SCAN_BATCH: usize = 200;

pub struct RedisTier {
    client: redis::Client,
    namespace: String,
    connect_timeout: Duration,
    conn: Mutex<Option<ConnectionManager>>,
}

impl RedisTier {
    /// Create a tier for `url`; no connection is attempted yet
    pub fn new(url: &str, namespace: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid redis url {}: {}", url, e)))?;

        Ok(Self {
            client,
            namespace: namespace.into(),
            connect_timeout,
            conn: Mutex::new(None),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let manager = tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| CacheError::Timeout {
            tier: Tier::Primary,
            timeout_ms: self.connect_timeout.as_millis() as u64,
        })??;

        info!("Connected to redis primary tier (namespace: {})", self.namespace);
        *guard = Some(manager.clone());
        Ok(manager)
    }

    /// Drop the cached connection so the next operation reconnects
    async fn reset_connection(&self) {
        *self.conn.lock().await = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn role(&self) -> Tier {
        Tier::Primary
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let redis_key = self.namespaced(key);
        let raw: Option<String> = self
            .run(|mut conn| async move { conn.get(&redis_key).await })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Ok(Some(entry.in_tier(Tier::Primary))),
            Err(e) => {
                debug!("Discarding undecodable redis entry {}: {}", key, e);
                self.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let Some(remaining) = entry.remaining_ttl() else {
            return Ok(());
        };
        let seconds = remaining.as_secs().max(1);
        let body = serde_json::to_string(&entry.clone().in_tier(Tier::Primary))?;
        let redis_key = self.namespaced(&entry.key);

        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(&redis_key, body, seconds).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let redis_key = self.namespaced(key);
        self.run(|mut conn| async move { conn.del::<_, ()>(&redis_key).await })
            .await
    }

    async fn clear(&self) -> Result<usize> {
        let pattern = format!("{}:*", self.namespace);
        self.run(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut removed = 0usize;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;

                if !keys.is_empty() {
                    removed += keys.len();
                    conn.del::<_, ()>(keys).await?;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<usize, redis::RedisError>(removed)
        })
        .await
    }
}
