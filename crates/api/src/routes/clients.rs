//! Route definitions for the `/clients` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::clients;
use crate::state::AppState;

/// Routes mounted at `/clients`.
///
/// ```text
/// POST   /register        -> register_client
/// GET    /                -> list_clients
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(clients::register_client))
        .route("/", get(clients::list_clients))
}
