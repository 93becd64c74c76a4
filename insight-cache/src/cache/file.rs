//! Durable file tier
//!
//! One JSON document per key, named by the SHA-256 of the key. Writes go to a
//! temporary file that is renamed into place, so a concurrent reader sees the
//! old document or the new one, never a partial write.
//!
//! The instant of the latest clear is kept next to the entries in
//! `cleared_at.mark`, so entries masked by a clear stay masked across restarts.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::cache::entry::CacheEntry;
use crate::cache::tier::CacheTier;
use crate::cache::types::Tier;
use crate::error::{CacheError, Result};

const CLEAR_MARK_FILE: &str = "cleared_at.mark";

pub struct FileTier {
    role: Tier,
    dir: PathBuf,
    write_seq: AtomicU64,
}

impl FileTier {
    /// Open (and create if needed) a file tier rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>, role: Tier) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            role,
            dir,
            write_seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = format!("{:x}", Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.json", name))
    }

    fn mark_path(&self) -> PathBuf {
        self.dir.join(CLEAR_MARK_FILE)
    }

    fn io_error(&self, e: std::io::Error) -> CacheError {
        CacheError::unavailable(self.role, format!("{}: {}", self.dir.display(), e))
    }
}

#[async_trait]
impl CacheTier for FileTier {
    fn name(&self) -> &'static str {
        "file"
    }

    fn role(&self) -> Tier {
        self.role
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.key == key => Ok(Some(entry.in_tier(self.role))),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Deleting corrupt cache file {}: {}", path.display(), e);
                if let Err(del_err) = tokio::fs::remove_file(&path).await {
                    debug!("Could not delete corrupt cache file: {}", del_err);
                }
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let stored = entry.clone().in_tier(self.role);
        let body = serde_json::to_vec(&stored)?;

        let path = self.path_for(&entry.key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.io_error(e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.io_error(e))?;

        while let Some(item) = dir.next_entry().await.map_err(|e| self.io_error(e))? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }

        Ok(removed)
    }

    async fn save_clear_mark(&self, cleared_at: i64) -> Result<()> {
        let path = self.mark_path();
        let tmp = path.with_extension("mark.tmp");
        tokio::fs::write(&tmp, cleared_at.to_string())
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn load_clear_mark(&self) -> Result<Option<i64>> {
        let raw = match tokio::fs::read_to_string(self.mark_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        match raw.trim().parse::<i64>() {
            Ok(mark) => Ok(Some(mark)),
            Err(e) => {
                warn!("Ignoring unreadable clear mark in {}: {}", self.dir.display(), e);
                Ok(None)
            }
        }
    }
}
