//! Query router
//!
//! Picks a backend per query and drives the single escalation to the
//! alternate backend when the chosen one fails or answers empty.

pub mod agents;
pub mod classifier;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{BackendError, BackendErrorKind, BackendId, BackendPool, Completion, InvocationParams};

pub use agents::Agent;
pub use classifier::{LabelledQuery, LearnedRouter, RoutingClassifier, TrainingSet};

/// Routing strategy names as they appear in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    Static,
    #[default]
    Hybrid,
    Learned,
}

impl StrategyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::Static => "static",
            StrategyName::Hybrid => "hybrid",
            StrategyName::Learned => "learned",
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(StrategyName::Static),
            "hybrid" => Ok(StrategyName::Hybrid),
            "learned" | "ml" => Ok(StrategyName::Learned),
            other => Err(format!("unknown routing strategy: {}", other)),
        }
    }
}

/// Which backends the deployment is allowed to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelStrategy {
    PrimaryOnly,
    SecondaryOnly,
    #[default]
    Hybrid,
}

impl ModelStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStrategy::PrimaryOnly => "primary-only",
            ModelStrategy::SecondaryOnly => "secondary-only",
            ModelStrategy::Hybrid => "hybrid",
        }
    }

    /// Backends that must be configured
    pub fn required_backends(&self) -> &'static [BackendId] {
        match self {
            ModelStrategy::PrimaryOnly => &[BackendId::PrimaryLlm],
            ModelStrategy::SecondaryOnly => &[BackendId::SecondaryLlm],
            ModelStrategy::Hybrid => &[BackendId::PrimaryLlm, BackendId::SecondaryLlm],
        }
    }
}

impl fmt::Display for ModelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "primary-only" | "gpt5" | "primary" => Ok(ModelStrategy::PrimaryOnly),
            "secondary-only" | "deepseek" | "secondary" => Ok(ModelStrategy::SecondaryOnly),
            "hybrid" => Ok(ModelStrategy::Hybrid),
            other => Err(format!("unknown model strategy: {}", other)),
        }
    }
}

/// The router's choice for one query. Fields are fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    query: String,
    chosen_backend: BackendId,
    strategy: StrategyName,
    confidence: f64,
    agent: Option<Agent>,
}

impl RouteDecision {
    fn new(query: &str, chosen_backend: BackendId, strategy: StrategyName, confidence: f64, agent: Option<Agent>) -> Self {
        Self {
            query: query.to_string(),
            chosen_backend,
            strategy,
            confidence: confidence.clamp(0.0, 1.0),
            agent,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn chosen_backend(&self) -> BackendId {
        self.chosen_backend
    }

    /// Strategy that actually produced the decision
    pub fn strategy(&self) -> StrategyName {
        self.strategy
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn agent(&self) -> Option<Agent> {
        self.agent
    }

    /// Sampling parameters for the lead agent
    pub fn params(&self) -> InvocationParams {
        self.agent.map(|a| a.params()).unwrap_or_else(agents::general_params)
    }
}

/// Rule-based routing: keyword classification with a confidence floor
#[derive(Debug, Clone, Copy)]
pub struct HybridRules {
    pub confidence_threshold: f64,
}

impl Default for HybridRules {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}

impl HybridRules {
    fn backend_for(&self, confidence: f64) -> BackendId {
        // Specialists run on the cheaper backend unless the call is uncertain.
        if confidence >= self.confidence_threshold {
            BackendId::SecondaryLlm
        } else {
            BackendId::PrimaryLlm
        }
    }

    pub fn decide(&self, query: &str) -> RouteDecision {
        match agents::classify(query) {
            Some((agent, confidence)) => RouteDecision::new(
                query,
                self.backend_for(confidence),
                StrategyName::Hybrid,
                confidence,
                Some(agent),
            ),
            None => RouteDecision::new(query, BackendId::PrimaryLlm, StrategyName::Hybrid, 0.0, None),
        }
    }
}

/// Configured routing strategy, one variant per policy
#[derive(Debug, Clone)]
pub enum RoutingStrategy {
    Static { backend: BackendId },
    Hybrid(HybridRules),
    Learned {
        router: Arc<LearnedRouter>,
        fallback: HybridRules,
    },
}

impl RoutingStrategy {
    pub fn name(&self) -> StrategyName {
        match self {
            RoutingStrategy::Static { .. } => StrategyName::Static,
            RoutingStrategy::Hybrid(_) => StrategyName::Hybrid,
            RoutingStrategy::Learned { .. } => StrategyName::Learned,
        }
    }

    pub fn route(&self, query: &str) -> RouteDecision {
        match self {
            RoutingStrategy::Static { backend } => {
                RouteDecision::new(query, *backend, StrategyName::Static, 1.0, agents::classify(query).map(|(a, _)| a))
            }
            RoutingStrategy::Hybrid(rules) => rules.decide(query),
            RoutingStrategy::Learned { router, fallback } => {
                if !router.is_trusted() {
                    debug!(
                        "Learned router accuracy {:.2} below {:.2}; using hybrid rules",
                        router.accuracy(),
                        router.accuracy_threshold()
                    );
                    return fallback.decide(query);
                }
                match router.classifier().predict(query) {
                    Some((agent, confidence)) => RouteDecision::new(
                        query,
                        fallback.backend_for(confidence),
                        StrategyName::Learned,
                        confidence,
                        Some(agent),
                    ),
                    None => fallback.decide(query),
                }
            }
        }
    }
}

/// Outcome of one backend attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub backend: BackendId,
    pub error: Option<BackendErrorKind>,
}

/// A successful dispatch, including any escalation that happened on the way
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub completion: Completion,
    pub backend: BackendId,
    pub escalated: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// Every allowed backend failed
#[derive(Debug, Clone, thiserror::Error)]
#[error("all backends failed: {}", summarize(.errors))]
pub struct DispatchError {
    pub errors: Vec<BackendError>,
}

fn summarize(errors: &[BackendError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

impl DispatchError {
    pub fn is_auth_failure(&self) -> bool {
        self.errors.iter().any(|e| e.kind == BackendErrorKind::Auth)
    }

    pub fn kinds(&self) -> Vec<BackendErrorKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }
}

/// Result of scoring one routing decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub correct: bool,
    pub accuracy: f64,
    pub trusted: bool,
}

pub struct Router {
    strategy: RoutingStrategy,
    model_strategy: ModelStrategy,
}

impl Router {
    pub fn new(strategy: RoutingStrategy, model_strategy: ModelStrategy) -> Self {
        Self {
            strategy,
            model_strategy,
        }
    }

    pub fn strategy(&self) -> &RoutingStrategy {
        &self.strategy
    }

    pub fn model_strategy(&self) -> ModelStrategy {
        self.model_strategy
    }

    pub fn route(&self, query: &str) -> RouteDecision {
        let decision = self.strategy.route(query);
        let forced = match self.model_strategy {
            ModelStrategy::PrimaryOnly => Some(BackendId::PrimaryLlm),
            ModelStrategy::SecondaryOnly => Some(BackendId::SecondaryLlm),
            ModelStrategy::Hybrid => None,
        };
        match forced {
            Some(backend) if backend != decision.chosen_backend => RouteDecision::new(
                query,
                backend,
                decision.strategy,
                decision.confidence,
                decision.agent,
            ),
            _ => decision,
        }
    }

    /// Score the learned classifier against the agent `query` should have gone to
    ///
    /// Returns `None` when the active strategy keeps no score.
    pub fn record_feedback(&self, query: &str, expected: Agent) -> Option<FeedbackOutcome> {
        let RoutingStrategy::Learned { router, .. } = &self.strategy else {
            return None;
        };
        let correct = router.classifier().predict(query).map(|(agent, _)| agent) == Some(expected);
        router.record_feedback(correct);
        Some(FeedbackOutcome {
            correct,
            accuracy: router.accuracy(),
            trusted: router.is_trusted(),
        })
    }

    /// Backend to try after the chosen one fails, if any
    pub fn escalation_target(&self, decision: &RouteDecision) -> Option<BackendId> {
        match self.model_strategy {
            ModelStrategy::SecondaryOnly => None,
            _ => Some(decision.chosen_backend.alternate()),
        }
    }

    /// Invoke the chosen backend, escalating at most once
    pub async fn dispatch(
        &self,
        decision: &RouteDecision,
        pool: &BackendPool,
        prompt: &str,
    ) -> Result<Dispatch, DispatchError> {
        let params = decision.params();
        let order: Vec<BackendId> = std::iter::once(decision.chosen_backend)
            .chain(self.escalation_target(decision))
            .collect();

        let mut attempts = Vec::with_capacity(order.len());
        let mut errors = Vec::new();

        for (i, backend) in order.into_iter().enumerate() {
            match pool.invoke(backend, prompt, &params).await {
                Ok(completion) => {
                    attempts.push(AttemptRecord { backend, error: None });
                    return Ok(Dispatch {
                        completion,
                        backend,
                        escalated: i > 0,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!("Backend attempt {} failed: {}", i + 1, e);
                    attempts.push(AttemptRecord {
                        backend,
                        error: Some(e.kind),
                    });
                    errors.push(e);
                }
            }
        }

        Err(DispatchError { errors })
    }
}
