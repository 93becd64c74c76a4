//! Scripted doubles for model backends and research providers

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use insight::backend::{BackendError, BackendErrorKind, BackendId, BackendPool, Completion, InvocationParams, ModelBackend, Usage};
use insight::retrieval::{Paper, ProviderError, ResearchProvider};
use insight::router::{HybridRules, ModelStrategy, Router, RoutingStrategy};
use insight::{Orchestrator, OrchestratorConfig};
use insight_cache::{CacheConfig, TieredCache};
use tempfile::TempDir;

/// Replies from a script, then from `default` once the script runs out
pub struct ScriptedBackend {
    id: BackendId,
    script: Mutex<VecDeque<Result<String, BackendErrorKind>>>,
    default: Result<String, BackendErrorKind>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn answering(id: BackendId, text: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(VecDeque::new()),
            default: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: BackendId, kind: BackendErrorKind) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(VecDeque::new()),
            default: Err(kind),
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers with whitespace only
    pub fn empty(id: BackendId) -> Arc<Self> {
        Self::answering(id, "   ")
    }

    pub fn scripted(id: BackendId, script: Vec<Result<&str, BackendErrorKind>>, default: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(script.into_iter().map(|r| r.map(str::to_string)).collect()),
            default: Ok(default.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _params: &InvocationParams) -> Result<Completion, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or_else(|| self.default.clone()) {
            Ok(text) => Ok(Completion {
                text,
                usage: Usage {
                    input_tokens: prompt.len() as u64,
                    output_tokens: 100,
                    ..Default::default()
                },
            }),
            Err(kind) => Err(BackendError::new(kind, self.id, "scripted failure")),
        }
    }
}

/// Research provider that always behaves the same way
pub struct ScriptedProvider {
    id: String,
    outcome: Result<Vec<Paper>, ProviderError>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn with_papers(id: &str, papers: Vec<Paper>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            outcome: Ok(papers),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn rate_limited(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            outcome: Err(ProviderError::RateLimited { retry_after: None }),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            outcome: Err(ProviderError::Failed("HTTP 500".to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn search(&self, _topic: &str, _limit: usize) -> Result<Vec<Paper>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

pub fn paper(title: &str, citations: u64, year: i32) -> Paper {
    Paper {
        paper_id: title.to_lowercase().replace(' ', "-"),
        title: title.to_string(),
        authors: vec!["Jane Doe".to_string(), "John Roe".to_string()],
        year: Some(year),
        abstract_text: format!("An abstract about {}", title),
        citation_count: citations,
        venue: "Journal of Testing".to_string(),
        source: "scripted".to_string(),
        ..Default::default()
    }
}

/// File-only cache rooted in a fresh temp dir
pub async fn file_cache() -> (Arc<TieredCache>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let cache = TieredCache::from_config(CacheConfig::file_only(temp_dir.path().join("cache")))
        .await
        .unwrap();
    (Arc::new(cache), temp_dir)
}

pub fn pool(backends: &[Arc<ScriptedBackend>]) -> BackendPool {
    backends.iter().fold(BackendPool::new(Duration::from_secs(5)), |pool, backend| {
        pool.with_backend(Arc::clone(backend) as Arc<dyn ModelBackend>)
    })
}

pub fn hybrid_router() -> Router {
    Router::new(RoutingStrategy::Hybrid(HybridRules::default()), ModelStrategy::Hybrid)
}

/// Hybrid routing over both backends, research disabled
pub fn orchestrator(
    primary: &Arc<ScriptedBackend>,
    secondary: &Arc<ScriptedBackend>,
    cache: Arc<TieredCache>,
) -> Orchestrator {
    Orchestrator::new(hybrid_router(), pool(&[Arc::clone(primary), Arc::clone(secondary)]), cache)
        .with_config(OrchestratorConfig::default())
}
