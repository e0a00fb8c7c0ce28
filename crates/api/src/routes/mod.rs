pub mod clients;
pub mod health;
pub mod stats;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /clients/register              register or refresh a worker (POST)
/// /clients                       list known workers (GET)
///
/// /tasks                         submit by shared-storage paths (POST)
/// /tasks/upload                  submit with uploaded files (POST, multipart)
/// /tasks/next                    claim the oldest pending task (POST)
/// /tasks/{id}                    task snapshot (GET)
/// /tasks/{id}/start              confirm processing (POST)
/// /tasks/{id}/result             report the outcome (POST)
/// /tasks/{id}/files/{kind}       download an artifact (GET)
/// /tasks/{id}/files/result       upload the result artifact (POST, multipart)
///
/// /stats                         queue depth and client counters (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/clients", clients::router())
        .nest("/tasks", tasks::router())
        .nest("/stats", stats::router())
}
