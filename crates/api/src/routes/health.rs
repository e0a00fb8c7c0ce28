use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use shutterq_core::protocol::StateCounts;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the exchange directory is reachable.
    pub exchange_healthy: bool,
    /// Queue depth by task state.
    pub queue: StateCounts,
    /// Workers seen within the liveness window.
    pub active_clients: usize,
}

/// GET /health -- liveness plus a queue-depth snapshot, consumed by both
/// operators and the workers' periodic server health checks.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let exchange_healthy = tokio::fs::metadata(state.exchange.root()).await.is_ok();
    let status = if exchange_healthy { "ok" } else { "degraded" };

    let queue = state.store.counts().await;
    let active_clients = state
        .registry
        .active_count(chrono::Utc::now(), state.config.client_liveness())
        .await;

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        exchange_healthy,
        queue,
        active_clients,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
