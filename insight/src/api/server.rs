//! API server for insight

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::orchestrator::Orchestrator;

use super::routes::{cache_stats, clear_cache, feedback, health_check, query, usage, AppState};

/// Configuration for the API server
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Routes over a shared orchestrator
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let app_state = Arc::new(AppState { orchestrator });

    Router::new()
        .route("/health", get(health_check))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .route("/usage", get(usage))
        .route("/query", post(query))
        .route("/feedback", post(feedback))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    orchestrator: Arc<Orchestrator>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self { config, orchestrator }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let app = build_router(self.orchestrator);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Starting API server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
