//! Configuration for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which tiers back the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackend {
    /// Redis primary with a file fallback
    #[default]
    TieredRemote,

    /// File tier only
    FileOnly,
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackend::TieredRemote => write!(f, "tiered-remote"),
            CacheBackend::FileOnly => write!(f, "file-only"),
        }
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiered-remote" | "tiered" | "redis" => Ok(CacheBackend::TieredRemote),
            "file-only" | "file" => Ok(CacheBackend::FileOnly),
            other => Err(format!("unknown cache backend: {}", other)),
        }
    }
}

/// Lifetime classes for cached payloads
///
/// Research content changes slowly and is kept for a week, as are general
/// answers that no specialist agent claimed. Agent answers are refreshed daily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    Research,
    Agent,
    Simple,
}

impl TtlClass {
    pub fn duration(&self) -> Duration {
        match self {
            TtlClass::Research | TtlClass::Simple => Duration::from_secs(7 * 24 * 3600),
            TtlClass::Agent => Duration::from_secs(24 * 3600),
        }
    }
}

/// Configuration for the tiered cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; a disabled cache always misses and records nothing
    pub enabled: bool,

    /// Tier layout
    pub backend: CacheBackend,

    /// Connection URL of the remote primary tier
    pub redis_url: String,

    /// Prefix applied to every key in shared tiers
    pub namespace: String,

    /// Directory of the durable fallback tier
    pub cache_dir: PathBuf,

    /// TTL used when the caller does not pick one
    pub default_ttl: Duration,

    /// Deadline for any single tier operation
    pub tier_timeout: Duration,

    /// Upper bound on waiting for in-flight readers before a clear
    pub clear_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::TieredRemote,
            redis_url: "redis://localhost:6379/0".to_string(),
            namespace: "bi".to_string(),
            cache_dir: PathBuf::from(".cache"),
            default_ttl: TtlClass::Agent.duration(),
            tier_timeout: Duration::from_millis(500),
            clear_timeout: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() {
            return Err("namespace must not be empty".to_string());
        }

        if self.tier_timeout.is_zero() {
            return Err("tier_timeout must be greater than 0".to_string());
        }

        if self.clear_timeout < self.tier_timeout {
            return Err("clear_timeout must be at least tier_timeout".to_string());
        }

        if self.backend == CacheBackend::TieredRemote && self.redis_url.trim().is_empty() {
            return Err("redis_url is required for the tiered-remote backend".to_string());
        }

        Ok(())
    }

    /// Configuration with only the durable file tier
    pub fn file_only(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: CacheBackend::FileOnly,
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Configuration that caches nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    enabled: Option<bool>,
    backend: Option<CacheBackend>,
    redis_url: Option<String>,
    namespace: Option<String>,
    cache_dir: Option<PathBuf>,
    default_ttl: Option<Duration>,
    tier_timeout: Option<Duration>,
    clear_timeout: Option<Duration>,
}

impl CacheConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn backend(mut self, backend: CacheBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the per-operation tier deadline
    pub fn tier_timeout(mut self, timeout: Duration) -> Self {
        self.tier_timeout = Some(timeout);
        self
    }

    pub fn clear_timeout(mut self, timeout: Duration) -> Self {
        self.clear_timeout = Some(timeout);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            backend: self.backend.unwrap_or(defaults.backend),
            redis_url: self.redis_url.unwrap_or(defaults.redis_url),
            namespace: self.namespace.unwrap_or(defaults.namespace),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            tier_timeout: self.tier_timeout.unwrap_or(defaults.tier_timeout),
            clear_timeout: self.clear_timeout.unwrap_or(defaults.clear_timeout),
        }
    }
}
