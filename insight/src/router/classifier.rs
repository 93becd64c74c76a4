//! Learned routing classifier
//!
//! Multinomial naive Bayes over query tokens, trained on labelled queries.
//! A query's first label is its lead agent; any label counts as correct when
//! measuring accuracy.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use super::agents::Agent;

/// Online accuracy is trusted over the offline figure after this many samples
const MIN_FEEDBACK_SAMPLES: u64 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelledQuery {
    pub query: String,
    pub agents: Vec<Agent>,
}

/// Training data with the usual splits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingSet {
    pub train: Vec<LabelledQuery>,
    #[serde(default)]
    pub val: Vec<LabelledQuery>,
    #[serde(default)]
    pub test: Vec<LabelledQuery>,
}

impl TrainingSet {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read training data {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse training data")
    }
}

fn tokenize(query: &str) -> impl Iterator<Item = String> + '_ {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingClassifier {
    documents: BTreeMap<Agent, u64>,
    token_counts: BTreeMap<Agent, BTreeMap<String, u64>>,
    token_totals: BTreeMap<Agent, u64>,
    vocabulary: BTreeSet<String>,
    validation_accuracy: f64,
}

impl RoutingClassifier {
    /// Fit on `set.train` and measure accuracy on `set.val` (or `set.train` if
    /// there is no validation split)
    pub fn train(set: &TrainingSet) -> Self {
        let mut model = Self::default();
        for example in &set.train {
            let Some(lead) = example.agents.first().copied() else {
                continue;
            };
            *model.documents.entry(lead).or_default() += 1;
            let counts = model.token_counts.entry(lead).or_default();
            for token in tokenize(&example.query) {
                *counts.entry(token.clone()).or_default() += 1;
                *model.token_totals.entry(lead).or_default() += 1;
                model.vocabulary.insert(token);
            }
        }

        let holdout = if set.val.is_empty() { &set.train } else { &set.val };
        model.validation_accuracy = model.evaluate(holdout);
        tracing::info!(
            "Trained routing classifier on {} examples (accuracy {:.2})",
            set.train.len(),
            model.validation_accuracy
        );
        model
    }

    pub fn validation_accuracy(&self) -> f64 {
        self.validation_accuracy
    }

    /// Override the measured accuracy, e.g. with a figure from an external evaluation
    pub fn with_validation_accuracy(mut self, accuracy: f64) -> Self {
        self.validation_accuracy = accuracy;
        self
    }

    pub fn is_trained(&self) -> bool {
        !self.documents.is_empty()
    }

    /// Most likely lead agent and its posterior probability
    pub fn predict(&self, query: &str) -> Option<(Agent, f64)> {
        let total_docs: u64 = self.documents.values().sum();
        if total_docs == 0 {
            return None;
        }
        let tokens: Vec<String> = tokenize(query).collect();
        let vocab = self.vocabulary.len() as f64;

        let scores: Vec<(Agent, f64)> = self
            .documents
            .iter()
            .map(|(agent, docs)| {
                let prior = (*docs as f64 / total_docs as f64).ln();
                let counts = self.token_counts.get(agent);
                let total = self.token_totals.get(agent).copied().unwrap_or(0) as f64;
                let likelihood: f64 = tokens
                    .iter()
                    .map(|t| {
                        let count = counts.and_then(|c| c.get(t)).copied().unwrap_or(0) as f64;
                        ((count + 1.0) / (total + vocab)).ln()
                    })
                    .sum();
                (*agent, prior + likelihood)
            })
            .collect();

        let (best, best_score) = scores
            .iter()
            .copied()
            .fold(None, |acc: Option<(Agent, f64)>, cur| match acc {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            })?;

        // Softmax over log scores, shifted for stability.
        let norm: f64 = scores.iter().map(|(_, s)| (s - best_score).exp()).sum();
        Some((best, 1.0 / norm))
    }

    /// Fraction of examples whose predicted agent is among their labels
    pub fn evaluate(&self, examples: &[LabelledQuery]) -> f64 {
        let labelled: Vec<&LabelledQuery> = examples.iter().filter(|e| !e.agents.is_empty()).collect();
        if labelled.is_empty() {
            return 0.0;
        }
        let correct = labelled
            .iter()
            .filter(|e| {
                self.predict(&e.query)
                    .map(|(agent, _)| e.agents.contains(&agent))
                    .unwrap_or(false)
            })
            .count();
        correct as f64 / labelled.len() as f64
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write classifier to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read classifier {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse classifier")
    }
}

/// Classifier plus the accuracy gate that decides whether it may route
#[derive(Debug)]
pub struct LearnedRouter {
    classifier: RoutingClassifier,
    accuracy_threshold: f64,
    feedback_total: AtomicU64,
    feedback_correct: AtomicU64,
}

impl LearnedRouter {
    pub fn new(classifier: RoutingClassifier, accuracy_threshold: f64) -> Self {
        Self {
            classifier,
            accuracy_threshold,
            feedback_total: AtomicU64::new(0),
            feedback_correct: AtomicU64::new(0),
        }
    }

    pub fn classifier(&self) -> &RoutingClassifier {
        &self.classifier
    }

    pub fn accuracy_threshold(&self) -> f64 {
        self.accuracy_threshold
    }

    /// Record whether a routed query went to the right agent
    pub fn record_feedback(&self, correct: bool) {
        self.feedback_total.fetch_add(1, Ordering::Relaxed);
        if correct {
            self.feedback_correct.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Online accuracy once enough feedback exists, otherwise the validation figure
    pub fn accuracy(&self) -> f64 {
        let total = self.feedback_total.load(Ordering::Relaxed);
        if total >= MIN_FEEDBACK_SAMPLES {
            self.feedback_correct.load(Ordering::Relaxed) as f64 / total as f64
        } else {
            self.classifier.validation_accuracy()
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.classifier.is_trained() && self.accuracy() >= self.accuracy_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(query: &str, agent: Agent) -> LabelledQuery {
        LabelledQuery {
            query: query.to_string(),
            agents: vec![agent],
        }
    }

    fn training_set() -> TrainingSet {
        TrainingSet {
            train: vec![
                example("forecast revenue and profit for next year", Agent::Financial),
                example("what budget do we need for the investment", Agent::Financial),
                example("how do competitors position in this market", Agent::Market),
                example("market trends in the retail industry", Agent::Market),
                example("automate the onboarding workflow", Agent::Operations),
                example("remove bottlenecks in the fulfilment process", Agent::Operations),
            ],
            val: vec![
                example("profit forecast", Agent::Financial),
                example("industry trends", Agent::Market),
            ],
            test: vec![],
        }
    }

    #[test]
    fn test_predicts_seen_vocabulary() {
        let model = RoutingClassifier::train(&training_set());
        let (agent, confidence) = model.predict("revenue forecast").unwrap();
        assert_eq!(agent, Agent::Financial);
        assert!(confidence > 0.5 && confidence <= 1.0);
        assert_eq!(model.validation_accuracy(), 1.0);
    }

    #[test]
    fn test_untrained_predicts_nothing() {
        let model = RoutingClassifier::default();
        assert!(model.predict("anything").is_none());
        assert!(!model.is_trained());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("router.json");
        let model = RoutingClassifier::train(&training_set());
        model.save(&path).unwrap();

        let loaded = RoutingClassifier::load(&path).unwrap();
        assert_eq!(loaded.predict("market trends"), model.predict("market trends"));
    }

    #[test]
    fn test_gate_uses_validation_accuracy_then_feedback() {
        let model = RoutingClassifier::train(&training_set()).with_validation_accuracy(0.70);
        let router = LearnedRouter::new(model, 0.85);
        assert!(!router.is_trusted());

        for _ in 0..MIN_FEEDBACK_SAMPLES {
            router.record_feedback(true);
        }
        assert_eq!(router.accuracy(), 1.0);
        assert!(router.is_trusted());
    }
}
