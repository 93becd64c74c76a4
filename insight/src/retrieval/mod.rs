//! Research retriever
//!
//! Chains external research providers in a fixed order. A rate-limited
//! provider is a soft failure: it is recorded, put on cool-down and the
//! chain moves on. Successful results are cached for a week so repeated
//! topics do not hit the providers again.

pub mod arxiv;
pub mod semantic_scholar;

use async_trait::async_trait;
use insight_cache::{Fingerprint, PayloadKind, TieredCache, TtlClass};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use arxiv::Arxiv;
pub use semantic_scholar::SemanticScholar;

/// One research paper as returned to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub paper_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub citation_count: u64,
    pub venue: String,
    pub url: String,
    pub source: String,
    /// Formatted reference, filled in after ranking
    #[serde(default)]
    pub citation: String,
}

impl Paper {
    pub fn format_citation(&self) -> String {
        let authors = match self.authors.as_slice() {
            [] => "Unknown".to_string(),
            [only] => only.clone(),
            [first, second] => format!("{} and {}", first, second),
            [first, ..] => format!("{} et al.", first),
        };
        let year = self.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".to_string());
        let title = if self.title.is_empty() { "Untitled" } else { &self.title };

        if self.venue.is_empty() {
            format!("{} ({}). {}.", authors, year, title)
        } else {
            format!("{} ({}). {}. {}.", authors, year, title, self.venue)
        }
    }
}

/// Render papers as prompt context
pub fn format_research_context(papers: &[Paper]) -> String {
    if papers.is_empty() {
        return "No relevant research papers found.".to_string();
    }

    let mut context = String::from("## Relevant Research Papers\n\n");
    for (i, paper) in papers.iter().enumerate() {
        let abstract_preview: String = paper.abstract_text.chars().take(300).collect();
        context.push_str(&format!("### Paper {}: {}\n", i + 1, paper.title));
        context.push_str(&format!("Abstract: {}...\n", abstract_preview));
        context.push_str(&format!("Citation: {}\n", paper.citation));
        if !paper.url.is_empty() {
            context.push_str(&format!("URL: {}\n", paper.url));
        }
        context.push('\n');
    }
    context
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request failed: {0}")]
    Failed(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Identifier used in provider order lists and failure counters
    fn id(&self) -> &str;

    async fn search(&self, topic: &str, limit: usize) -> Result<Vec<Paper>, ProviderError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    #[error("all research providers exhausted for '{topic}' (tried: {})", .attempted.join(", "))]
    AllProvidersExhausted { topic: String, attempted: Vec<String> },
}

/// One retrieval in flight. The attempted set only grows.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    topic: String,
    providers: Vec<String>,
    attempted: BTreeSet<String>,
}

impl RetrievalRequest {
    pub fn new(topic: impl Into<String>, providers: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            providers,
            attempted: BTreeSet::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn attempted(&self) -> &BTreeSet<String> {
        &self.attempted
    }

    /// Record an attempt; false if the provider was already tried
    fn mark_attempted(&mut self, provider: &str) -> bool {
        self.attempted.insert(provider.to_string())
    }

    pub fn is_exhausted(&self) -> bool {
        self.providers.iter().all(|p| self.attempted.contains(p))
    }

    /// Attempted providers in first-listed order
    fn attempted_in_order(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.providers
            .iter()
            .filter(|p| self.attempted.contains(*p) && seen.insert(p.as_str()))
            .cloned()
            .collect()
    }
}

/// Papers plus the provider that supplied them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrieval {
    pub papers: Vec<Paper>,
    pub provider_used: String,
    #[serde(skip)]
    pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalMetrics {
    pub lookups: u64,
    pub cache_hits: u64,
    pub outbound_calls: u64,
}

impl RetrievalMetrics {
    /// Share of lookups that did not need an outbound call
    pub fn call_reduction(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            1.0 - (self.outbound_calls as f64 / self.lookups as f64).min(1.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub provider_order: Vec<String>,
    /// How long a rate-limited provider is skipped when it gives no Retry-After
    pub cooldown: Duration,
    pub call_timeout: Duration,
    /// Papers kept after ranking
    pub top_k: usize,
    /// Papers requested from a provider
    pub fetch_limit: usize,
    pub cache_ttl: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            provider_order: vec![semantic_scholar::PROVIDER_ID.to_string(), arxiv::PROVIDER_ID.to_string()],
            cooldown: Duration::from_secs(300),
            call_timeout: Duration::from_secs(10),
            top_k: 3,
            fetch_limit: 10,
            cache_ttl: TtlClass::Research.duration(),
        }
    }
}

pub struct ResearchRetriever {
    providers: HashMap<String, Arc<dyn ResearchProvider>>,
    config: RetrieverConfig,
    cache: Arc<TieredCache>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    lookups: AtomicU64,
    cache_hits: AtomicU64,
    outbound_calls: AtomicU64,
}

impl ResearchRetriever {
    pub fn new(config: RetrieverConfig, cache: Arc<TieredCache>) -> Self {
        Self {
            providers: HashMap::new(),
            config,
            cache,
            cooldowns: Mutex::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            outbound_calls: AtomicU64::new(0),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ResearchProvider>) -> Self {
        self.providers.insert(provider.id().to_string(), provider);
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn metrics(&self) -> RetrievalMetrics {
        RetrievalMetrics {
            lookups: self.lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            outbound_calls: self.outbound_calls.load(Ordering::Relaxed),
        }
    }

    fn cache_key(topic: &str) -> String {
        Fingerprint::new(PayloadKind::Research)
            .query(topic)
            .strategy("research")
            .build()
    }

    /// Retrieve using the configured provider order
    pub async fn retrieve(&self, topic: &str) -> Result<Retrieval, RetrievalError> {
        let order = self.config.provider_order.clone();
        self.retrieve_with(topic, &order).await
    }

    pub async fn retrieve_with(&self, topic: &str, provider_order: &[String]) -> Result<Retrieval, RetrievalError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let key = Self::cache_key(topic);
        if let Some(mut cached) = self.cache.get_json::<Retrieval>(&key).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Research cache hit for '{}' ({})", topic, cached.provider_used);
            cached.from_cache = true;
            return Ok(cached);
        }

        let mut request = RetrievalRequest::new(topic, provider_order.to_vec());

        for provider_id in provider_order {
            if !request.mark_attempted(provider_id) {
                continue;
            }

            if let Some(remaining) = self.cooldown_remaining(provider_id).await {
                debug!("Skipping {} for another {}s (cool-down)", provider_id, remaining.as_secs());
                continue;
            }
            let Some(provider) = self.providers.get(provider_id) else {
                warn!("Unknown research provider '{}' in provider order", provider_id);
                continue;
            };

            self.outbound_calls.fetch_add(1, Ordering::Relaxed);
            let outcome = match tokio::time::timeout(
                self.config.call_timeout,
                provider.search(topic, self.config.fetch_limit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.config.call_timeout)),
            };

            match outcome {
                Ok(papers) if !papers.is_empty() => {
                    let retrieval = Retrieval {
                        papers: self.rank(papers),
                        provider_used: provider_id.clone(),
                        from_cache: false,
                    };
                    info!(
                        "Retrieved {} papers for '{}' from {}",
                        retrieval.papers.len(),
                        topic,
                        provider_id
                    );
                    self.cache.put_json(&key, &retrieval, self.config.cache_ttl).await;
                    return Ok(retrieval);
                }
                Ok(_) => debug!("{} returned no papers for '{}'", provider_id, topic),
                Err(ProviderError::RateLimited { retry_after }) => {
                    let cooldown = retry_after.unwrap_or(self.config.cooldown);
                    warn!("{} rate limited; cooling down for {}s", provider_id, cooldown.as_secs());
                    self.cache.record_provider_failure(provider_id).await;
                    self.cooldowns
                        .lock()
                        .await
                        .insert(provider_id.clone(), Instant::now() + cooldown);
                }
                Err(e) => {
                    warn!("{} failed for '{}': {}", provider_id, topic, e);
                    self.cache.record_provider_failure(provider_id).await;
                }
            }
        }

        debug_assert!(request.is_exhausted());
        Err(RetrievalError::AllProvidersExhausted {
            topic: request.topic().to_string(),
            attempted: request.attempted_in_order(),
        })
    }

    async fn cooldown_remaining(&self, provider: &str) -> Option<Duration> {
        let mut cooldowns = self.cooldowns.lock().await;
        let until = *cooldowns.get(provider)?;
        let now = Instant::now();
        if until > now {
            Some(until - now)
        } else {
            cooldowns.remove(provider);
            None
        }
    }

    /// Highest cited first, newer first on ties, then truncate and cite
    fn rank(&self, mut papers: Vec<Paper>) -> Vec<Paper> {
        papers.sort_by(|a, b| {
            b.citation_count
                .cmp(&a.citation_count)
                .then_with(|| b.year.cmp(&a.year))
        });
        papers.truncate(self.config.top_k);
        for paper in &mut papers {
            paper.citation = paper.format_citation();
        }
        papers
    }
}

/// Build the HTTP providers named in `order`
pub fn http_providers(order: &[String], semantic_scholar_key: Option<String>) -> Vec<Arc<dyn ResearchProvider>> {
    order
        .iter()
        .filter_map(|id| -> Option<Arc<dyn ResearchProvider>> {
            match id.as_str() {
                semantic_scholar::PROVIDER_ID => Some(Arc::new(SemanticScholar::new(semantic_scholar_key.clone()))),
                arxiv::PROVIDER_ID => Some(Arc::new(Arxiv::new())),
                other => {
                    warn!("No built-in research provider named '{}'", other);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(title: &str, citations: u64, year: Option<i32>) -> Paper {
        Paper {
            title: title.to_string(),
            citation_count: citations,
            year,
            ..Default::default()
        }
    }

    #[test]
    fn test_citation_formats() {
        let mut p = paper("Scaling Laws", 10, Some(2020));
        assert_eq!(p.format_citation(), "Unknown (2020). Scaling Laws.");

        p.authors = vec!["Kaplan".into(), "McCandlish".into()];
        p.venue = "arXiv".into();
        assert_eq!(p.format_citation(), "Kaplan and McCandlish (2020). Scaling Laws. arXiv.");

        p.authors.push("Henighan".into());
        p.year = None;
        assert_eq!(p.format_citation(), "Kaplan et al. (n.d.). Scaling Laws. arXiv.");
    }

    #[test]
    fn test_request_attempted_only_grows() {
        let mut request = RetrievalRequest::new("topic", vec!["a".into(), "b".into()]);
        assert!(!request.is_exhausted());
        assert!(request.mark_attempted("a"));
        assert!(!request.mark_attempted("a"));
        assert_eq!(request.attempted().len(), 1);
        assert!(request.mark_attempted("b"));
        assert!(request.is_exhausted());
        assert_eq!(request.attempted_in_order(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_call_reduction() {
        let metrics = RetrievalMetrics {
            lookups: 10,
            cache_hits: 7,
            outbound_calls: 3,
        };
        assert!((metrics.call_reduction() - 0.7).abs() < 1e-9);
        assert_eq!(RetrievalMetrics::default().call_reduction(), 0.0);
    }

    #[tokio::test]
    async fn test_rank_orders_by_citations_then_year() {
        let cache = Arc::new(TieredCache::new(insight_cache::CacheConfig::disabled(), None, None));
        let retriever = ResearchRetriever::new(RetrieverConfig::default(), cache);

        let ranked = retriever.rank(vec![
            paper("old", 5, Some(2001)),
            paper("popular", 50, Some(2010)),
            paper("new", 5, Some(2022)),
            paper("obscure", 0, None),
        ]);
        let titles: Vec<&str> = ranked.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["popular", "new", "old"]);
        assert!(ranked.iter().all(|p| !p.citation.is_empty()));
    }

    #[test]
    fn test_context_mentions_every_paper() {
        let mut p = paper("Scaling Laws", 10, Some(2020));
        p.citation = p.format_citation();
        let context = format_research_context(&[p]);
        assert!(context.contains("Paper 1: Scaling Laws"));
        assert!(context.contains("Citation: Unknown (2020). Scaling Laws."));
        assert_eq!(format_research_context(&[]), "No relevant research papers found.");
    }
}
