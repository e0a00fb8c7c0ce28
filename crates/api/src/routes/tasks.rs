//! Route definitions for the `/tasks` resource: submission, the worker
//! claim/confirm/report protocol, and artifact transfer.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{files, tasks};
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// POST   /                     -> submit_task (shared-storage paths)
/// POST   /upload               -> submit_task_upload (multipart)
/// POST   /next                 -> next_task (worker poll)
/// GET    /{id}                 -> task_status
/// POST   /{id}/start           -> start_processing
/// POST   /{id}/result          -> report_result
/// GET    /{id}/files/{kind}    -> download_file
/// POST   /{id}/files/{kind}    -> upload_result (multipart, kind=result only)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(tasks::submit_task))
        .route("/upload", post(tasks::submit_task_upload))
        .route("/next", post(tasks::next_task))
        .route("/{id}", get(tasks::task_status))
        .route("/{id}/start", post(tasks::start_processing))
        .route("/{id}/result", post(tasks::report_result))
        .route(
            "/{id}/files/{kind}",
            get(files::download_file).post(files::upload_result),
        )
}
