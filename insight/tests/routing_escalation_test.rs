//! Escalation between the two model backends

mod common;

use std::sync::Arc;

use common::{file_cache, orchestrator, pool, ScriptedBackend};
use insight::backend::{BackendErrorKind, BackendId};
use insight::router::{HybridRules, ModelStrategy, Router, RoutingStrategy};
use insight::{Orchestrator, QueryError};

const GENERAL_QUERY: &str = "Tell me something interesting about our company";
const FINANCIAL_QUERY: &str = "What is our profit margin and ROI?";

#[tokio::test]
async fn test_empty_primary_escalates_once() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::empty(BackendId::PrimaryLlm);
    let secondary = ScriptedBackend::answering(BackendId::SecondaryLlm, "answer from secondary");
    let orch = orchestrator(&primary, &secondary, cache);

    let answer = orch.answer(GENERAL_QUERY).await.unwrap();

    assert_eq!(answer.text, "answer from secondary");
    assert_eq!(answer.backend, BackendId::SecondaryLlm);
    assert!(answer.escalated);
    assert!(!answer.used_cache);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);

    let usage = orch.usage().await;
    assert_eq!(usage.escalations, 1);
    assert_eq!(usage.backend_calls, 2);
}

#[tokio::test]
async fn test_failing_secondary_escalates_to_primary() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::answering(BackendId::PrimaryLlm, "answer from primary");
    let secondary = ScriptedBackend::failing(BackendId::SecondaryLlm, BackendErrorKind::RateLimited);
    let orch = orchestrator(&primary, &secondary, cache);

    let answer = orch.answer(FINANCIAL_QUERY).await.unwrap();

    assert_eq!(answer.backend, BackendId::PrimaryLlm);
    assert!(answer.escalated);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_both_failing_is_terminal_with_kinds() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::failing(BackendId::PrimaryLlm, BackendErrorKind::Timeout);
    let secondary = ScriptedBackend::empty(BackendId::SecondaryLlm);
    let orch = orchestrator(&primary, &secondary, Arc::clone(&cache));

    let err = orch.answer(GENERAL_QUERY).await.unwrap_err();

    assert!(matches!(err, QueryError::BackendsExhausted(_)));
    assert_eq!(err.kinds(), vec![BackendErrorKind::Timeout, BackendErrorKind::EmptyResponse]);
    assert!(err.is_transient());
    assert!(!err.is_auth_failure());

    // No third attempt and nothing cached
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(cache.stats().await.saves, 0);
    assert_eq!(orch.usage().await.terminal_failures, 1);
}

#[tokio::test]
async fn test_auth_failure_is_reported() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::failing(BackendId::PrimaryLlm, BackendErrorKind::Auth);
    let secondary = ScriptedBackend::failing(BackendId::SecondaryLlm, BackendErrorKind::Unavailable);
    let orch = orchestrator(&primary, &secondary, cache);

    let err = orch.answer(GENERAL_QUERY).await.unwrap_err();

    assert!(err.is_auth_failure());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_secondary_only_never_escalates() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::answering(BackendId::PrimaryLlm, "should not be used");
    let secondary = ScriptedBackend::failing(BackendId::SecondaryLlm, BackendErrorKind::Unavailable);
    let router = Router::new(RoutingStrategy::Hybrid(HybridRules::default()), ModelStrategy::SecondaryOnly);
    let orch = Orchestrator::new(router, pool(&[Arc::clone(&primary), Arc::clone(&secondary)]), cache);

    let err = orch.answer(GENERAL_QUERY).await.unwrap_err();

    assert_eq!(err.kinds(), vec![BackendErrorKind::Unavailable]);
    assert_eq!(primary.calls(), 0);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn test_primary_only_routes_specialists_to_primary() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::answering(BackendId::PrimaryLlm, "primary answer");
    let secondary = ScriptedBackend::answering(BackendId::SecondaryLlm, "secondary answer");
    let router = Router::new(RoutingStrategy::Hybrid(HybridRules::default()), ModelStrategy::PrimaryOnly);
    let orch = Orchestrator::new(router, pool(&[Arc::clone(&primary), Arc::clone(&secondary)]), cache);

    let answer = orch.answer(FINANCIAL_QUERY).await.unwrap();

    assert_eq!(answer.backend, BackendId::PrimaryLlm);
    assert!(!answer.escalated);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_blank_query_is_rejected() {
    let (cache, _temp_dir) = file_cache().await;
    let primary = ScriptedBackend::answering(BackendId::PrimaryLlm, "unused");
    let secondary = ScriptedBackend::answering(BackendId::SecondaryLlm, "unused");
    let orch = orchestrator(&primary, &secondary, cache);

    let err = orch.answer("   ").await.unwrap_err();

    assert!(matches!(err, QueryError::EmptyQuery));
    assert_eq!(primary.calls() + secondary.calls(), 0);
}
