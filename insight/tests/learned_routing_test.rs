//! Learned routing and its accuracy gate

use std::sync::Arc;

use insight::backend::BackendId;
use insight::router::{
    Agent, HybridRules, LabelledQuery, LearnedRouter, ModelStrategy, Router, RoutingClassifier, RoutingStrategy,
    StrategyName, TrainingSet,
};
use tempfile::TempDir;

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
            example("what budget do we need for this investment", Agent::Financial),
            example("cash flow forecast for the new store", Agent::Financial),
            example("how do competitors position in this market", Agent::Market),
            example("market trends in the retail industry", Agent::Market),
            example("automate the onboarding workflow", Agent::Operations),
            example("remove bottlenecks in the fulfilment process", Agent::Operations),
            example("grow the sales funnel with more qualified leads", Agent::Leadgen),
        ],
        val: vec![
            example("profit forecast", Agent::Financial),
            example("industry trends", Agent::Market),
        ],
        test: vec![example("onboarding workflow", Agent::Operations)],
    }
}

fn learned(classifier: RoutingClassifier, threshold: f64) -> (Router, Arc<LearnedRouter>) {
    let learned = Arc::new(LearnedRouter::new(classifier, threshold));
    let router = Router::new(
        RoutingStrategy::Learned {
            router: Arc::clone(&learned),
            fallback: HybridRules::default(),
        },
        ModelStrategy::Hybrid,
    );
    (router, learned)
}

#[test]
fn test_low_accuracy_falls_back_to_hybrid_rules() {
    let classifier = RoutingClassifier::train(&training_set()).with_validation_accuracy(0.70);
    let (router, gate) = learned(classifier, 0.85);
    assert!(!gate.is_trusted());

    let query = "Forecast revenue and budget for the next quarter";
    let decision = router.route(query);
    let expected = HybridRules::default().decide(query);

    assert_eq!(decision.strategy(), StrategyName::Hybrid);
    assert_eq!(decision.chosen_backend(), expected.chosen_backend());
    assert_eq!(decision.agent(), expected.agent());
    assert_eq!(decision.confidence(), expected.confidence());
    // The configured strategy is still the learned one
    assert_eq!(router.strategy().name(), StrategyName::Learned);
}

#[test]
fn test_trusted_classifier_routes() {
    let classifier = RoutingClassifier::train(&training_set()).with_validation_accuracy(0.92);
    let (router, gate) = learned(classifier, 0.85);
    assert!(gate.is_trusted());

    let decision = router.route("revenue forecast");

    assert_eq!(decision.strategy(), StrategyName::Learned);
    assert_eq!(decision.agent(), Some(Agent::Financial));
    assert_eq!(decision.chosen_backend(), BackendId::SecondaryLlm);
}

#[test]
fn test_poor_feedback_demotes_classifier() {
    let classifier = RoutingClassifier::train(&training_set()).with_validation_accuracy(0.95);
    let (router, gate) = learned(classifier, 0.85);

    for i in 0..20 {
        gate.record_feedback(i % 2 == 0);
    }

    assert!((gate.accuracy() - 0.5).abs() < 1e-9);
    assert!(!gate.is_trusted());
    assert_eq!(router.route("revenue forecast").strategy(), StrategyName::Hybrid);
}

#[test]
fn test_router_feedback_scores_the_classifier() {
    let classifier = RoutingClassifier::train(&training_set()).with_validation_accuracy(0.95);
    let (router, gate) = learned(classifier, 0.85);

    let outcome = router.record_feedback("revenue forecast", Agent::Financial).unwrap();
    assert!(outcome.correct);
    assert!(outcome.trusted);

    for _ in 0..19 {
        let outcome = router.record_feedback("revenue forecast", Agent::Market).unwrap();
        assert!(!outcome.correct);
    }

    assert!((gate.accuracy() - 0.05).abs() < 1e-9);
    assert!(!gate.is_trusted());
    assert_eq!(router.route("revenue forecast").strategy(), StrategyName::Hybrid);
}

#[test]
fn test_feedback_is_ignored_without_a_learned_strategy() {
    let router = Router::new(RoutingStrategy::Hybrid(HybridRules::default()), ModelStrategy::Hybrid);
    assert!(router.record_feedback("revenue forecast", Agent::Financial).is_none());
}

#[test]
fn test_train_save_load_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let data_path = temp_dir.path().join("training.json");
    let model_path = temp_dir.path().join("routing_classifier.json");
    std::fs::write(&data_path, serde_json::to_string(&training_set()).unwrap()).unwrap();

    let set = TrainingSet::load(&data_path).unwrap();
    let model = RoutingClassifier::train(&set);
    model.save(&model_path).unwrap();
    let loaded = RoutingClassifier::load(&model_path).unwrap();

    assert!(loaded.is_trained());
    assert_eq!(loaded.validation_accuracy(), model.validation_accuracy());
    assert_eq!(loaded.evaluate(&set.test), model.evaluate(&set.test));
}

#[test]
fn test_missing_model_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(RoutingClassifier::load(&temp_dir.path().join("missing.json")).is_err());
}
