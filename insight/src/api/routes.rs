//! API routes for the insight server

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use insight_cache::CacheStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::BackendErrorKind;
use crate::orchestrator::{Orchestrator, QueryError};
use crate::router::Agent;

/// Application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache_backend: String,
    pub cache_hit_rate_percent: f64,
}

/// Cache stats plus derived figures
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            total_requests: stats.total_requests(),
            hit_rate_percent: stats.hit_rate(),
            stats,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub status: String,
    pub removed: usize,
    pub unreachable_tiers: Vec<String>,
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    /// Agent that should have handled the query
    pub agent: Agent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub recorded: bool,
    pub correct: Option<bool>,
    pub accuracy: Option<f64>,
    pub trusted: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub kinds: Vec<BackendErrorKind>,
    pub auth_failure: bool,
}

/// Health check endpoint
pub async fn health_check(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = app_state.orchestrator.cache_stats().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_backend: stats.backend.clone(),
        cache_hit_rate_percent: stats.hit_rate(),
    })
}

pub async fn cache_stats(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(CacheStatsResponse::from(app_state.orchestrator.cache_stats().await))
}

pub async fn clear_cache(State(app_state): State<Arc<AppState>>) -> Result<impl IntoResponse, StatusCode> {
    let report = app_state.orchestrator.clear_cache().await.map_err(|e| {
        tracing::error!("Cache clear failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(ClearResponse {
        status: "cleared".to_string(),
        removed: report.removed,
        unreachable_tiers: report.unreachable.iter().map(|t| t.to_string()).collect(),
    }))
}

pub async fn usage(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(app_state.orchestrator.usage().await)
}

/// Score the learned router; a no-op under other strategies
pub async fn feedback(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<FeedbackRequest>,
) -> impl IntoResponse {
    let outcome = app_state.orchestrator.record_feedback(&payload.query, payload.agent);
    Json(FeedbackResponse {
        recorded: outcome.is_some(),
        correct: outcome.map(|o| o.correct),
        accuracy: outcome.map(|o| o.accuracy),
        trusted: outcome.map(|o| o.trusted),
    })
}

/// Answer a query; terminal backend failures map to 502
pub async fn query(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    match app_state.orchestrator.answer(&payload.query).await {
        Ok(answer) => Ok(Json(answer)),
        Err(e) => {
            let status = match e {
                QueryError::EmptyQuery => StatusCode::BAD_REQUEST,
                QueryError::BackendsExhausted(_) => StatusCode::BAD_GATEWAY,
            };
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                    kinds: e.kinds(),
                    auth_failure: e.is_auth_failure(),
                }),
            ))
        }
    }
}
