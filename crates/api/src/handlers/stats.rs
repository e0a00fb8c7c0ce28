//! Handlers for the `/stats` resource.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use shutterq_core::protocol::StateCounts;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Aggregate view over the task queue and the worker fleet. Eventually
/// consistent: counts are read without blocking the protocol paths.
#[derive(Debug, Serialize)]
pub struct StatsOverview {
    pub tasks: StateCounts,
    pub clients: ClientStats,
}

#[derive(Debug, Serialize)]
pub struct ClientStats {
    pub registered: usize,
    pub active: usize,
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// GET /api/v1/stats
pub async fn overview(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let tasks = state.store.counts().await;

    let records = state.registry.list().await;
    let active = state
        .registry
        .active_count(Utc::now(), state.config.client_liveness())
        .await;

    let clients = ClientStats {
        registered: records.len(),
        active,
        tasks_claimed: records.iter().map(|c| c.tasks_claimed).sum(),
        tasks_completed: records.iter().map(|c| c.tasks_completed).sum(),
        tasks_failed: records.iter().map(|c| c.tasks_failed).sum(),
    };

    Ok(Json(DataResponse {
        data: StatsOverview { tasks, clients },
    }))
}
