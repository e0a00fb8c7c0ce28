//! Shared helpers for the API integration tests.
//!
//! Each test binary compiles this module independently, so not every helper
//! is used everywhere.
#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use shutterq_api::config::ServerConfig;
use shutterq_api::routes;
use shutterq_api::state::AppState;

/// Build a test `ServerConfig` rooted at the given exchange directory.
///
/// Timeouts that would slow a test down (file-wait, sweeps) are shrunk to
/// fractions of a second; state-machine windows keep production-like values
/// so nothing is reclaimed mid-test unless a test shrinks them itself.
pub fn test_config(exchange_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        exchange_dir: exchange_dir.to_path_buf(),
        task_capacity: 100,
        max_attempts: 3,
        reading_timeout_secs: 60,
        processing_timeout_secs: 600,
        sweep_interval_secs: 3600,
        terminal_retention_secs: 3600,
        client_liveness_secs: 60,
        client_prune_secs: 600,
        max_file_bytes: 4096,
        max_request_bytes: 4096 + 64 * 1024,
        photo_extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
        preset_extensions: vec!["xmp".into(), "lua".into(), "json".into()],
        file_wait_timeout_secs: 1,
        file_wait_base_delay_ms: 50,
        file_wait_backoff_factor: 1.5,
        file_wait_max_delay_secs: 1,
    }
}

/// Build the full application router with all middleware layers over the
/// given configuration.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery, body limit) that production uses. The `AppState` is
/// returned alongside the router so tests can reach into the store and the
/// exchange directly.
pub async fn build_test_app(config: ServerConfig) -> (Router, AppState) {
    let body_limit = config.max_request_bytes as usize;
    let request_timeout = Duration::from_secs(config.request_timeout_secs);

    let state = AppState::build(config)
        .await
        .expect("Failed to initialize exchange directory");

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state.clone());

    (router, state)
}

/// Build an app over a fresh temporary exchange directory.
///
/// The `TempDir` guard must be kept alive for the duration of the test or
/// the exchange directory disappears under the server.
pub async fn test_app() -> (Router, AppState, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (router, state) = build_test_app(test_config(dir.path())).await;
    (router, state, dir)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a GET request to the app and return the raw response.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request");
    app.oneshot(request).await.expect("Request failed")
}

/// Send a POST request with a JSON body and return the raw response.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request");
    app.oneshot(request).await.expect("Request failed")
}

/// Send a POST request carrying a multipart form and return the raw response.
pub async fn post_multipart(app: Router, uri: &str, form: MultipartForm) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, form.content_type())
        .body(Body::from(form.into_body()))
        .expect("Failed to build request");
    app.oneshot(request).await.expect("Request failed")
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body was not valid JSON")
}

/// Collect a response body as raw bytes (for download assertions).
pub async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes()
}

// ---------------------------------------------------------------------------
// Multipart form builder
// ---------------------------------------------------------------------------

const MULTIPART_BOUNDARY: &str = "shutterq-test-boundary";

/// Hand-rolled `multipart/form-data` body builder.
///
/// `reqwest::multipart` cannot feed `tower::ServiceExt::oneshot`, so tests
/// assemble the wire format themselves.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body
            .extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Append a file field with the given filename and contents.
    pub fn file(mut self, name: &str, file_name: &str, bytes: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n")
                .as_bytes(),
        );
        self.body
            .extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}")
    }

    fn into_body(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

// ---------------------------------------------------------------------------
// Protocol shortcuts
// ---------------------------------------------------------------------------

/// Register a worker id and assert the call succeeded.
pub async fn register_client(app: &Router, client_id: &str) {
    let response = post_json(
        app.clone(),
        "/api/v1/clients/register",
        serde_json::json!({ "client_id": client_id }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK, "registration must succeed");
}

/// Submit a task by shared-storage paths and return its id.
pub async fn submit_local_task(app: &Router) -> String {
    let response = post_json(
        app.clone(),
        "/api/v1/tasks",
        serde_json::json!({
            "photo_path": "/mnt/photos/input.jpg",
            "preset_path": "/mnt/presets/warm.xmp",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    json["data"]["id"]
        .as_str()
        .expect("submitted task must have an id")
        .to_string()
}

/// Claim the next task for a worker, returning the `data` value
/// (a task object, or `null` when the queue is empty).
pub async fn claim_next(app: &Router, client_id: &str) -> serde_json::Value {
    let response = post_json(
        app.clone(),
        "/api/v1/tasks/next",
        serde_json::json!({ "client_id": client_id }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut json = body_json(response).await;
    json["data"].take()
}
