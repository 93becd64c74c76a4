//! Application configuration
//!
//! Loaded from an optional YAML file, then overridden by environment
//! variables (a `.env` file is honoured).

use anyhow::{bail, Context, Result};
use insight_cache::{CacheBackend, CacheConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::backend::openai::{DEEPSEEK_BASE_URL, OPENAI_BASE_URL};
use crate::backend::BackendId;
use crate::retrieval::{arxiv, semantic_scholar};
use crate::router::{ModelStrategy, StrategyName};

pub const DEFAULT_CONFIG_FILE: &str = "insight.yaml";

/// When research retrieval runs relative to the backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    Disabled,
    /// Research first, included in the prompt
    #[default]
    Before,
    /// Concurrent with the backend call, attached as citations only
    Alongside,
}

impl fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResearchMode::Disabled => write!(f, "disabled"),
            ResearchMode::Before => write!(f, "before"),
            ResearchMode::Alongside => write!(f, "alongside"),
        }
    }
}

impl FromStr for ResearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "off" | "false" => Ok(ResearchMode::Disabled),
            "before" | "on" | "true" => Ok(ResearchMode::Before),
            "alongside" | "parallel" => Ok(ResearchMode::Alongside),
            other => Err(format!("unknown research mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub routing: RoutingConfig,
    pub models: ModelsConfig,
    pub cache: CacheSettings,
    pub research: ResearchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: StrategyName,
    /// Backend used by the static strategy
    pub static_backend: BackendId,
    /// Below this classification confidence the primary backend is used
    pub confidence_threshold: f64,
    /// The learned classifier routes only at or above this accuracy
    pub learned_accuracy_threshold: f64,
    pub classifier_path: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyName::Hybrid,
            static_backend: BackendId::PrimaryLlm,
            confidence_threshold: 0.5,
            learned_accuracy_threshold: 0.85,
            classifier_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub strategy: ModelStrategy,
    pub timeout_secs: u64,
    pub primary: BackendSettings,
    pub secondary: BackendSettings,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            strategy: ModelStrategy::Hybrid,
            timeout_secs: 120,
            primary: BackendSettings {
                base_url: OPENAI_BASE_URL.to_string(),
                api_key: None,
                model: "gpt-5-nano".to_string(),
            },
            secondary: BackendSettings {
                base_url: DEEPSEEK_BASE_URL.to_string(),
                api_key: None,
                model: "deepseek-chat".to_string(),
            },
        }
    }
}

impl ModelsConfig {
    pub fn settings(&self, id: BackendId) -> &BackendSettings {
        match id {
            BackendId::PrimaryLlm => &self.primary,
            BackendId::SecondaryLlm => &self.secondary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: String,
    pub namespace: String,
    pub dir: PathBuf,
    pub tier_timeout_ms: u64,
    pub clear_timeout_secs: u64,
    /// TTL of cached answers
    pub answer_ttl_secs: u64,
    /// TTL of cached research results
    pub research_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            enabled: defaults.enabled,
            backend: defaults.backend,
            redis_url: defaults.redis_url,
            namespace: defaults.namespace,
            dir: defaults.cache_dir,
            tier_timeout_ms: defaults.tier_timeout.as_millis() as u64,
            clear_timeout_secs: defaults.clear_timeout.as_secs(),
            answer_ttl_secs: insight_cache::TtlClass::Agent.duration().as_secs(),
            research_ttl_secs: insight_cache::TtlClass::Research.duration().as_secs(),
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::builder()
            .enabled(self.enabled)
            .backend(self.backend)
            .redis_url(self.redis_url.clone())
            .namespace(self.namespace.clone())
            .cache_dir(self.dir.clone())
            .default_ttl(self.answer_ttl())
            .tier_timeout(Duration::from_millis(self.tier_timeout_ms))
            .clear_timeout(Duration::from_secs(self.clear_timeout_secs))
            .build()
    }

    pub fn answer_ttl(&self) -> Duration {
        Duration::from_secs(self.answer_ttl_secs)
    }

    pub fn research_ttl(&self) -> Duration {
        Duration::from_secs(self.research_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub mode: ResearchMode,
    /// Providers in the order they are tried
    pub providers: Vec<String>,
    /// Cool-down for a rate-limited provider without a Retry-After hint
    pub cooldown_secs: u64,
    pub timeout_secs: u64,
    pub top_k: usize,
    pub semantic_scholar_api_key: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            mode: ResearchMode::Before,
            providers: vec![semantic_scholar::PROVIDER_ID.to_string(), arxiv::PROVIDER_ID.to_string()],
            cooldown_secs: 300,
            timeout_secs: 10,
            top_k: 3,
            semantic_scholar_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    match value.parse::<T>() {
        Ok(v) => Ok(v),
        Err(e) => bail!("Invalid {}={:?}: {}", name, value, e),
    }
}

impl AppConfig {
    /// Load configuration: explicit file, else `insight.yaml`, else the user
    /// config dir, else defaults; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("insight").join("config.yaml"))
            .filter(|p| p.exists())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROUTING_STRATEGY") {
            self.routing.strategy = parse_env("ROUTING_STRATEGY", &v)?;
        }
        if let Some(v) = lookup("LEARNED_ACCURACY_THRESHOLD") {
            self.routing.learned_accuracy_threshold = parse_env("LEARNED_ACCURACY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ROUTER_MODEL_PATH") {
            self.routing.classifier_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MODEL_STRATEGY") {
            self.models.strategy = parse_env("MODEL_STRATEGY", &v)?;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.models.primary.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.models.primary.model = v;
        }
        if let Some(v) = lookup("DEEPSEEK_API_KEY") {
            self.models.secondary.api_key = Some(v);
        }
        if let Some(v) = lookup("DEEPSEEK_CHAT_MODEL") {
            self.models.secondary.model = v;
        }
        if let Some(v) = lookup("CACHE_ENABLED") {
            self.cache.enabled = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("CACHE_BACKEND") {
            self.cache.backend = parse_env("CACHE_BACKEND", &v)?;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.cache.redis_url = v;
        }
        if let Some(v) = lookup("CACHE_NAMESPACE") {
            self.cache.namespace = v;
        }
        if let Some(v) = lookup("CACHE_DIR") {
            self.cache.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RESEARCH_MODE") {
            self.research.mode = parse_env("RESEARCH_MODE", &v)?;
        }
        if let Some(v) = lookup("RESEARCH_PROVIDERS") {
            self.research.providers = v
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(v) = lookup("SEMANTIC_SCHOLAR_API_KEY") {
            self.research.semantic_scholar_api_key = Some(v);
        }
        Ok(())
    }

    /// Problems that would make the configuration unusable; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (name, value) in [
            ("routing.confidence_threshold", self.routing.confidence_threshold),
            ("routing.learned_accuracy_threshold", self.routing.learned_accuracy_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                problems.push(format!("{} must be within [0, 1], got {}", name, value));
            }
        }

        for id in self.models.strategy.required_backends() {
            let settings = self.models.settings(*id);
            if settings.api_key.as_deref().map_or(true, str::is_empty) {
                problems.push(format!(
                    "{} needs an API key when the model strategy is {}",
                    id, self.models.strategy
                ));
            }
        }
        if self.models.timeout_secs == 0 {
            problems.push("models.timeout_secs must be greater than 0".to_string());
        }

        if let Err(e) = self.cache.to_cache_config().validate() {
            problems.push(format!("cache: {}", e));
        }

        if self.research.mode != ResearchMode::Disabled {
            if self.research.providers.is_empty() {
                problems.push("research.providers must list at least one provider".to_string());
            }
            if self.research.top_k == 0 {
                problems.push("research.top_k must be greater than 0".to_string());
            }
            let mut seen = std::collections::HashSet::new();
            for provider in &self.research.providers {
                if !seen.insert(provider.as_str()) {
                    problems.push(format!("research.providers lists {} more than once", provider));
                }
            }
        }

        problems
    }
}
