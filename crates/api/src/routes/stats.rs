//! Route definitions for the `/stats` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::stats;
use crate::state::AppState;

/// Routes mounted at `/stats`.
///
/// ```text
/// GET    /                -> overview
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(stats::overview))
}
