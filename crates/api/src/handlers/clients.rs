//! Handlers for the `/clients` resource.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use shutterq_core::protocol::RegisterClientRequest;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/clients/register
///
/// Register a worker, or refresh it if the id is already known. Idempotent:
/// workers call this on startup and again whenever a server comes back
/// from an outage.
pub async fn register_client(
    State(state): State<AppState>,
    Json(input): Json<RegisterClientRequest>,
) -> AppResult<impl IntoResponse> {
    let record = state
        .registry
        .register(&input.client_id, input.capabilities, Utc::now())
        .await?;

    Ok(Json(DataResponse { data: record }))
}

/// GET /api/v1/clients
///
/// List every known worker with its counters and last-seen time.
pub async fn list_clients(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let clients = state.registry.list().await;
    Ok(Json(DataResponse { data: clients }))
}
