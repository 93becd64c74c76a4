use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use insight_cache::{CacheError, CacheStats, ClearReport, Fingerprint, PayloadKind, TieredCache};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{BackendErrorKind, BackendId, BackendPool, OpenAiCompatible, Usage};
use crate::config::{AppConfig, ResearchMode};
use crate::retrieval::{self, format_research_context, Paper, ResearchRetriever, Retrieval, RetrieverConfig};
use crate::router::{
    Agent, Dispatch, DispatchError, FeedbackOutcome, HybridRules, LearnedRouter, RouteDecision, Router, RoutingClassifier,
    RoutingStrategy, StrategyName,
};

/// Result of one query, handed to document generation as-is
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub query_id: Uuid,
    pub text: String,
    pub used_cache: bool,
    /// Backend that produced the text
    pub backend: BackendId,
    pub agent: Option<Agent>,
    pub strategy: StrategyName,
    pub research_included: bool,
    pub citations: Vec<String>,
    pub escalated: bool,
    pub usage: Usage,
    pub latency_ms: u64,
}

/// What gets cached for an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedAnswer {
    text: String,
    backend: BackendId,
    agent: Option<Agent>,
    strategy: StrategyName,
    research_included: bool,
    citations: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    BackendsExhausted(#[from] DispatchError),
}

impl QueryError {
    /// True when a backend rejected our credentials, i.e. operator action is needed
    pub fn is_auth_failure(&self) -> bool {
        match self {
            QueryError::BackendsExhausted(e) => e.is_auth_failure(),
            QueryError::EmptyQuery => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            QueryError::BackendsExhausted(e) => e.errors.iter().all(|err| err.kind.is_transient()),
            QueryError::EmptyQuery => false,
        }
    }

    pub fn kinds(&self) -> Vec<BackendErrorKind> {
        match self {
            QueryError::BackendsExhausted(e) => e.kinds(),
            QueryError::EmptyQuery => Vec::new(),
        }
    }
}

/// Cumulative cost and latency since start-up
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub queries: u64,
    pub cache_hits: u64,
    pub backend_calls: u64,
    pub escalations: u64,
    pub terminal_failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub total_latency_ms: u64,
    pub research: retrieval::RetrievalMetrics,
}

impl UsageReport {
    pub fn average_latency_ms(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.queries as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub research_mode: ResearchMode,
    /// Lifetime of answers a specialist agent handled
    pub answer_ttl: Duration,
    /// Lifetime of answers no agent claimed
    pub simple_ttl: Duration,
    /// Tenant prefix for cache keys
    pub client_id: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            research_mode: ResearchMode::Disabled,
            answer_ttl: insight_cache::TtlClass::Agent.duration(),
            simple_ttl: insight_cache::TtlClass::Simple.duration(),
            client_id: None,
        }
    }
}

pub struct Orchestrator {
    router: Router,
    backends: BackendPool,
    cache: Arc<TieredCache>,
    retriever: Option<Arc<ResearchRetriever>>,
    config: OrchestratorConfig,
    ledger: Mutex<UsageReport>,
}

impl Orchestrator {
    pub fn new(router: Router, backends: BackendPool, cache: Arc<TieredCache>) -> Self {
        Self {
            router,
            backends,
            cache,
            retriever: None,
            config: OrchestratorConfig::default(),
            ledger: Mutex::new(UsageReport::default()),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<ResearchRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Wire every component from application configuration
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = Arc::new(TieredCache::from_config(config.cache.to_cache_config()).await?);

        let mut backends = BackendPool::new(Duration::from_secs(config.models.timeout_secs));
        for id in [BackendId::PrimaryLlm, BackendId::SecondaryLlm] {
            let settings = config.models.settings(id);
            match settings.api_key.as_deref().filter(|k| !k.is_empty()) {
                Some(key) => {
                    let backend = OpenAiCompatible::new(id, &settings.base_url, key, &settings.model)?;
                    backends = backends.with_backend(Arc::new(backend));
                }
                None => debug!("{} has no API key; not configured", id),
            }
        }

        let mut orchestrator = Self::new(build_router(config)?, backends, Arc::clone(&cache)).with_config(
            OrchestratorConfig {
                research_mode: config.research.mode,
                answer_ttl: config.cache.answer_ttl(),
                ..OrchestratorConfig::default()
            },
        );

        if config.research.mode != ResearchMode::Disabled {
            let retriever_config = RetrieverConfig {
                provider_order: config.research.providers.clone(),
                cooldown: Duration::from_secs(config.research.cooldown_secs),
                call_timeout: Duration::from_secs(config.research.timeout_secs),
                top_k: config.research.top_k,
                cache_ttl: config.cache.research_ttl(),
                ..RetrieverConfig::default()
            };
            let mut retriever = ResearchRetriever::new(retriever_config, cache);
            for provider in retrieval::http_providers(
                &config.research.providers,
                config.research.semantic_scholar_api_key.clone(),
            ) {
                retriever = retriever.with_provider(provider);
            }
            orchestrator = orchestrator.with_retriever(Arc::new(retriever));
        }

        info!(
            "Orchestrator ready: routing={}, models={}, research={}, cache={}",
            config.routing.strategy,
            config.models.strategy,
            config.research.mode,
            orchestrator.cache.backend_name()
        );
        Ok(orchestrator)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Cache key of a query: the requested strategy, never the realized backend
    fn cache_key(&self, query: &str) -> String {
        let topic = (self.config.research_mode != ResearchMode::Disabled).then_some(query);
        Fingerprint::new(PayloadKind::Answer)
            .query(query)
            .strategy(self.router.strategy().name().as_str())
            .topic(topic)
            .client(self.config.client_id.as_deref())
            .build()
    }

    /// Answer a query: route, consult the cache, invoke (and escalate), write back
    pub async fn answer(&self, query: &str) -> Result<Answer, QueryError> {
        let query_id = Uuid::new_v4();
        self.answer_inner(query_id, query)
            .instrument(info_span!("answer", %query_id))
            .await
    }

    async fn answer_inner(&self, query_id: Uuid, query: &str) -> Result<Answer, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let started = Instant::now();

        let decision = self.router.route(query);
        debug!(
            "ROUTING -> {} via {} (confidence {:.2})",
            decision.chosen_backend(),
            decision.strategy(),
            decision.confidence()
        );

        let key = self.cache_key(query);
        if let Some(cached) = self.cache.get_json::<CachedAnswer>(&key).await {
            debug!("CACHE_LOOKUP -> hit");
            let latency_ms = started.elapsed().as_millis() as u64;
            self.record(|l| {
                l.queries += 1;
                l.cache_hits += 1;
                l.total_latency_ms += latency_ms;
            })
            .await;
            return Ok(Answer {
                query_id,
                text: cached.text,
                used_cache: true,
                backend: cached.backend,
                agent: cached.agent,
                strategy: cached.strategy,
                research_included: cached.research_included,
                citations: cached.citations,
                escalated: false,
                usage: Usage::default(),
                latency_ms,
            });
        }
        debug!("CACHE_LOOKUP -> miss");

        let (research, dispatched) = match self.config.research_mode {
            ResearchMode::Disabled => (None, self.invoke(&decision, query, None).await),
            ResearchMode::Before => {
                let research = self.research(query).await;
                let dispatched = self.invoke(&decision, query, research.as_ref()).await;
                (research, dispatched)
            }
            ResearchMode::Alongside => tokio::join!(self.research(query), self.invoke(&decision, query, None)),
        };

        let dispatch = match dispatched {
            Ok(dispatch) => dispatch,
            Err(e) => {
                error!("TERMINAL_FAILURE: {}", e);
                let latency_ms = started.elapsed().as_millis() as u64;
                let calls = e.errors.len() as u64;
                self.record(|l| {
                    l.queries += 1;
                    l.backend_calls += calls;
                    l.terminal_failures += 1;
                    l.total_latency_ms += latency_ms;
                })
                .await;
                return Err(QueryError::BackendsExhausted(e));
            }
        };
        if dispatch.escalated {
            info!("ESCALATE -> answered by {}", dispatch.backend);
        }

        let papers: &[Paper] = research.as_ref().map(|r| r.papers.as_slice()).unwrap_or(&[]);
        let cached = CachedAnswer {
            text: dispatch.completion.text.clone(),
            backend: dispatch.backend,
            agent: decision.agent(),
            strategy: decision.strategy(),
            research_included: !papers.is_empty(),
            citations: papers.iter().map(|p| p.citation.clone()).collect(),
        };
        if self.config.research_mode != ResearchMode::Disabled && research.is_none() {
            // Research was wanted but unavailable; let the next ask try again.
            debug!("CACHE_WRITE -> skipped, research missing");
        } else {
            let ttl = if cached.agent.is_some() {
                self.config.answer_ttl
            } else {
                self.config.simple_ttl
            };
            self.cache.put_json(&key, &cached, ttl).await;
            debug!("CACHE_WRITE -> {}", key);
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let usage = dispatch.completion.usage.clone();
        let calls = dispatch.attempts.len() as u64;
        let escalated = dispatch.escalated;
        self.record(|l| {
            l.queries += 1;
            l.backend_calls += calls;
            l.escalations += u64::from(escalated);
            l.input_tokens += usage.input_tokens;
            l.output_tokens += usage.output_tokens;
            l.total_cost_usd += usage.cost_usd;
            l.total_latency_ms += latency_ms;
        })
        .await;

        Ok(Answer {
            query_id,
            text: cached.text,
            used_cache: false,
            backend: cached.backend,
            agent: cached.agent,
            strategy: cached.strategy,
            research_included: cached.research_included,
            citations: cached.citations,
            escalated,
            usage,
            latency_ms,
        })
    }

    async fn invoke(&self, decision: &RouteDecision, query: &str, research: Option<&Retrieval>) -> Result<Dispatch, DispatchError> {
        let prompt = build_prompt(query, research.map(|r| r.papers.as_slice()));
        self.router.dispatch(decision, &self.backends, &prompt).await
    }

    /// Research never fails the query; exhaustion just omits it
    async fn research(&self, topic: &str) -> Option<Retrieval> {
        let retriever = self.retriever.as_ref()?;
        match retriever.retrieve(topic).await {
            Ok(retrieval) => Some(retrieval),
            Err(e) => {
                warn!("Research omitted: {}", e);
                None
            }
        }
    }

    async fn record<F: FnOnce(&mut UsageReport)>(&self, update: F) {
        let mut ledger = self.ledger.lock().await;
        update(&mut ledger);
    }

    /// Report the agent that should have handled `query`
    ///
    /// Only the learned strategy keeps score; `None` under any other strategy.
    pub fn record_feedback(&self, query: &str, agent: Agent) -> Option<FeedbackOutcome> {
        let outcome = self.router.record_feedback(query, agent)?;
        info!(
            "Routing feedback: {} (online accuracy {:.2}, trusted: {})",
            if outcome.correct { "correct" } else { "wrong" },
            outcome.accuracy,
            outcome.trusted
        );
        Some(outcome)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Invalidate every cached entry and reset the cache counters
    pub async fn clear_cache(&self) -> Result<ClearReport, CacheError> {
        let report = self.cache.clear().await?;
        info!(
            "Cache cleared ({} entries, {} unreachable tiers)",
            report.removed,
            report.unreachable.len()
        );
        Ok(report)
    }

    pub async fn usage(&self) -> UsageReport {
        let mut report = self.ledger.lock().await.clone();
        if let Some(retriever) = &self.retriever {
            report.research = retriever.metrics();
        }
        report
    }
}

fn build_prompt(query: &str, papers: Option<&[Paper]>) -> String {
    match papers {
        Some(papers) if !papers.is_empty() => format!(
            "{}\nQuery: {}\n\nGround your answer in the research above where relevant and cite it.",
            format_research_context(papers),
            query
        ),
        _ => query.to_string(),
    }
}

fn build_router(config: &AppConfig) -> Result<Router> {
    let rules = HybridRules {
        confidence_threshold: config.routing.confidence_threshold,
    };
    let strategy = match config.routing.strategy {
        StrategyName::Static => RoutingStrategy::Static {
            backend: config.routing.static_backend,
        },
        StrategyName::Hybrid => RoutingStrategy::Hybrid(rules),
        StrategyName::Learned => {
            let classifier = match &config.routing.classifier_path {
                Some(path) if path.exists() => RoutingClassifier::load(path)?,
                Some(path) => {
                    warn!("Routing classifier {} not found; hybrid rules will route", path.display());
                    RoutingClassifier::default()
                }
                None => {
                    warn!("No routing classifier configured; hybrid rules will route");
                    RoutingClassifier::default()
                }
            };
            RoutingStrategy::Learned {
                router: Arc::new(LearnedRouter::new(classifier, config.routing.learned_accuracy_threshold)),
                fallback: rules,
            }
        }
    };
    Ok(Router::new(strategy, config.models.strategy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_without_research_is_the_query() {
        assert_eq!(build_prompt("q", None), "q");
        assert_eq!(build_prompt("q", Some(&[])), "q");
    }

    #[test]
    fn test_prompt_with_research_lists_papers() {
        let paper = Paper {
            title: "Dynamic Pricing".into(),
            citation: "Doe (2020). Dynamic Pricing.".into(),
            ..Default::default()
        };
        let prompt = build_prompt("How should we price?", Some(&[paper]));
        assert!(prompt.contains("Paper 1: Dynamic Pricing"));
        assert!(prompt.contains("Query: How should we price?"));
    }

    #[test]
    fn test_learned_router_without_classifier_is_untrusted() {
        let mut config = AppConfig::default();
        config.routing.strategy = StrategyName::Learned;
        let router = build_router(&config).unwrap();

        let decision = router.route("forecast revenue and profit");
        assert_eq!(decision.strategy(), StrategyName::Hybrid);
        assert_eq!(router.strategy().name(), StrategyName::Learned);
    }

    #[test]
    fn test_query_error_diagnostics() {
        use crate::backend::BackendError;

        let err = QueryError::from(DispatchError {
            errors: vec![
                BackendError::new(BackendErrorKind::Auth, BackendId::PrimaryLlm, "bad key"),
                BackendError::timeout(BackendId::SecondaryLlm, Duration::from_secs(1)),
            ],
        });
        assert!(err.is_auth_failure());
        assert!(!err.is_transient());
        assert_eq!(err.kinds(), vec![BackendErrorKind::Auth, BackendErrorKind::Timeout]);
    }
}
