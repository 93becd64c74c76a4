//! Research retrieval across providers, cool-downs and the shared cache

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{file_cache, paper, ScriptedProvider};
use insight::retrieval::{ResearchRetriever, RetrievalError, RetrieverConfig};

fn config(order: &[&str]) -> RetrieverConfig {
    RetrieverConfig {
        provider_order: order.iter().map(|p| p.to_string()).collect(),
        cooldown: Duration::from_secs(300),
        ..RetrieverConfig::default()
    }
}

#[tokio::test]
async fn test_rate_limited_provider_falls_through() {
    let (cache, _temp_dir) = file_cache().await;
    let limited = ScriptedProvider::rate_limited("alpha");
    let healthy = ScriptedProvider::with_papers("beta", vec![paper("Dynamic Pricing", 40, 2021)]);
    let retriever = ResearchRetriever::new(config(&["alpha", "beta"]), Arc::clone(&cache))
        .with_provider(limited.clone())
        .with_provider(healthy.clone());

    let retrieval = retriever.retrieve("pricing strategy").await.unwrap();

    assert_eq!(retrieval.provider_used, "beta");
    assert_eq!(retrieval.papers.len(), 1);
    assert_eq!(retrieval.papers[0].citation, "Jane Doe and John Roe (2021). Dynamic Pricing. Journal of Testing.");
    assert!(!retrieval.from_cache);

    let stats = cache.stats().await;
    assert_eq!(stats.provider_failures.get("alpha"), Some(&1));
    assert_eq!(stats.provider_failures.get("beta"), None);
}

#[tokio::test]
async fn test_cooldown_persists_across_calls() {
    let (cache, _temp_dir) = file_cache().await;
    let limited = ScriptedProvider::rate_limited("alpha");
    let healthy = ScriptedProvider::with_papers("beta", vec![paper("Churn Models", 12, 2019)]);
    let retriever = ResearchRetriever::new(config(&["alpha", "beta"]), cache)
        .with_provider(limited.clone())
        .with_provider(healthy.clone());

    retriever.retrieve("customer churn").await.unwrap();
    // A different topic misses the cache, so providers are consulted again
    let second = retriever.retrieve("supply chain resilience").await.unwrap();

    assert_eq!(second.provider_used, "beta");
    assert_eq!(limited.calls(), 1, "cooling provider must not be called");
    assert_eq!(healthy.calls(), 2);
}

#[tokio::test]
async fn test_cached_research_skips_providers() {
    let (cache, _temp_dir) = file_cache().await;
    let provider = ScriptedProvider::with_papers("beta", vec![paper("Lean Operations", 8, 2018)]);
    let retriever = ResearchRetriever::new(config(&["beta"]), cache).with_provider(provider.clone());

    let first = retriever.retrieve("lean operations").await.unwrap();
    let second = retriever.retrieve("  Lean   Operations ").await.unwrap();

    assert!(second.from_cache);
    assert_eq!(second.papers, first.papers);
    assert_eq!(provider.calls(), 1);

    let metrics = retriever.metrics();
    assert_eq!(metrics.lookups, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.outbound_calls, 1);
    assert!((metrics.call_reduction() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_ranking_prefers_citations_then_recency() {
    let (cache, _temp_dir) = file_cache().await;
    let provider = ScriptedProvider::with_papers(
        "beta",
        vec![
            paper("Old Classic", 90, 2001),
            paper("Minor Note", 1, 2023),
            paper("Recent Classic", 90, 2022),
            paper("Solid Study", 30, 2015),
        ],
    );
    let retriever = ResearchRetriever::new(config(&["beta"]), cache).with_provider(provider);

    let retrieval = retriever.retrieve("classics").await.unwrap();
    let titles: Vec<&str> = retrieval.papers.iter().map(|p| p.title.as_str()).collect();

    assert_eq!(titles, vec!["Recent Classic", "Old Classic", "Solid Study"]);
}

#[tokio::test]
async fn test_all_providers_exhausted() {
    let (cache, _temp_dir) = file_cache().await;
    let retriever = ResearchRetriever::new(config(&["alpha", "beta"]), Arc::clone(&cache))
        .with_provider(ScriptedProvider::rate_limited("alpha"))
        .with_provider(ScriptedProvider::failing("beta"));

    let err = retriever.retrieve("unobtainium").await.unwrap_err();

    let RetrievalError::AllProvidersExhausted { topic, attempted } = err;
    assert_eq!(topic, "unobtainium");
    assert_eq!(attempted, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(cache.stats().await.total_provider_failures(), 2);
}

#[tokio::test]
async fn test_empty_results_fall_through() {
    let (cache, _temp_dir) = file_cache().await;
    let empty = ScriptedProvider::with_papers("alpha", Vec::new());
    let healthy = ScriptedProvider::with_papers("beta", vec![paper("Funnel Metrics", 5, 2020)]);
    let retriever = ResearchRetriever::new(config(&["alpha", "beta"]), Arc::clone(&cache))
        .with_provider(empty.clone())
        .with_provider(healthy);

    let retrieval = retriever.retrieve("sales funnel").await.unwrap();

    assert_eq!(retrieval.provider_used, "beta");
    assert_eq!(empty.calls(), 1);
    // An empty result is not a provider failure
    assert_eq!(cache.stats().await.total_provider_failures(), 0);
}

#[tokio::test]
async fn test_repeated_provider_is_tried_once_per_retrieval() {
    let (cache, _temp_dir) = file_cache().await;
    let flaky = ScriptedProvider::failing("alpha");
    let retriever = ResearchRetriever::new(config(&["alpha", "alpha"]), Arc::clone(&cache))
        .with_provider(flaky.clone());

    let err = retriever.retrieve("warehouse automation").await.unwrap_err();

    let RetrievalError::AllProvidersExhausted { attempted, .. } = err;
    assert_eq!(attempted, vec!["alpha".to_string()]);
    assert_eq!(flaky.calls(), 1);
    assert_eq!(cache.stats().await.provider_failures.get("alpha"), Some(&1));
}
