//! End-to-end tests running the agent against a real in-process server.
//!
//! Each test binds a `shutterq-api` router on an ephemeral port, seeds it
//! over plain HTTP, and drives the agent's runner or poller against it.
//! The edit bridge is replaced by a stub processor.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use shutterq_agent::api::ServerApi;
use shutterq_agent::config::AgentConfig;
use shutterq_agent::connection::ServerConnection;
use shutterq_agent::poller::Poller;
use shutterq_agent::processor::{EditProcessor, ProcessRequest, ProcessorError};
use shutterq_agent::runner;
use shutterq_api::config::ServerConfig;
use shutterq_api::routes;
use shutterq_api::state::AppState;
use shutterq_core::task::Task;

const PHOTO_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, b'e', b'2', b'e'];
const PRESET_BYTES: &[u8] = b"s = { Exposure2012 = 0.4, Contrast2012 = 8 }";

// ---------------------------------------------------------------------------
// In-process server
// ---------------------------------------------------------------------------

fn server_config(exchange_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        exchange_dir: exchange_dir.to_path_buf(),
        task_capacity: 100,
        max_attempts: 3,
        reading_timeout_secs: 60,
        processing_timeout_secs: 600,
        sweep_interval_secs: 3600,
        terminal_retention_secs: 3600,
        client_liveness_secs: 60,
        client_prune_secs: 600,
        max_file_bytes: 1024 * 1024,
        max_request_bytes: 2 * 1024 * 1024,
        photo_extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
        preset_extensions: vec!["xmp".into(), "lua".into(), "json".into()],
        file_wait_timeout_secs: 1,
        file_wait_base_delay_ms: 20,
        file_wait_backoff_factor: 1.5,
        file_wait_max_delay_secs: 1,
    }
}

/// Bind the full API router on an ephemeral port and serve it in the
/// background for the rest of the test.
async fn spawn_server(config: ServerConfig) -> (String, AppState) {
    let state = AppState::build(config).await.expect("exchange init");
    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let base = format!("http://{}", listener.local_addr().expect("listener addr"));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    (base, state)
}

// ---------------------------------------------------------------------------
// Seeding and polling helpers
// ---------------------------------------------------------------------------

async fn submit_upload_task(client: &reqwest::Client, base: &str) -> String {
    let form = reqwest::multipart::Form::new()
        .part(
            "photo",
            reqwest::multipart::Part::bytes(PHOTO_BYTES.to_vec()).file_name("shoot.jpg"),
        )
        .part(
            "preset",
            reqwest::multipart::Part::bytes(PRESET_BYTES.to_vec()).file_name("style.xmp"),
        );
    let response = client
        .post(format!("{base}/api/v1/tasks/upload"))
        .multipart(form)
        .send()
        .await
        .expect("upload request");
    assert_eq!(response.status().as_u16(), 201);

    let json: serde_json::Value = response.json().await.expect("upload body");
    json["data"]["id"].as_str().expect("task id").to_string()
}

async fn submit_local_task(
    client: &reqwest::Client,
    base: &str,
    photo: &Path,
    preset: &Path,
) -> String {
    let body = serde_json::json!({
        "photo_path": photo.to_string_lossy(),
        "preset_path": preset.to_string_lossy(),
    });
    let response = client
        .post(format!("{base}/api/v1/tasks"))
        .json(&body)
        .send()
        .await
        .expect("submit request");
    assert_eq!(response.status().as_u16(), 201);

    let json: serde_json::Value = response.json().await.expect("submit body");
    json["data"]["id"].as_str().expect("task id").to_string()
}

async fn fetch_task(client: &reqwest::Client, base: &str, task_id: &str) -> serde_json::Value {
    let response = client
        .get(format!("{base}/api/v1/tasks/{task_id}"))
        .send()
        .await
        .expect("fetch request");
    assert_eq!(response.status().as_u16(), 200);

    let mut json: serde_json::Value = response.json().await.expect("fetch body");
    json["data"].take()
}

async fn wait_for_task_state(
    client: &reqwest::Client,
    base: &str,
    task_id: &str,
    want: &str,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = fetch_task(client, base, task_id).await;
        if task["state"] == want {
            return task;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "task {task_id} never reached '{want}', last state {}",
                task["state"]
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// ---------------------------------------------------------------------------
// Agent-side helpers
// ---------------------------------------------------------------------------

fn test_agent_config(server_url: &str, workspace: &Path) -> Arc<AgentConfig> {
    Arc::new(AgentConfig {
        servers: vec![server_url.to_string()],
        client_id: "e2e-worker".to_string(),
        // Never dialed; the tests plug in a stub processor.
        bridge_url: "http://127.0.0.1:1".to_string(),
        workspace_dir: workspace.to_path_buf(),
        hostname: Some("e2e-host".to_string()),
        processing_slots: 2,
        poll_interval_ms: 20,
        idle_poll_interval_ms: 50,
        empty_poll_threshold: 1000,
        base_retry_delay_ms: 10,
        max_retry_delay_secs: 1,
        backoff_factor: 1.5,
        failure_threshold: 5,
        cooldown_secs: 60,
        health_check_interval_secs: 3600,
        http_timeout_secs: 5,
        shutdown_timeout_secs: 5,
        processing_buffer_secs: 5,
        base_processing_timeout_secs: 5,
        mask_step_secs: 2,
        complex_step_secs: 3,
        max_mask_timeout_secs: 120,
        max_complex_timeout_secs: 60,
        unreadable_timeout_secs: 30,
        file_wait_timeout_secs: 2,
        file_wait_base_delay_ms: 10,
        file_wait_backoff_factor: 1.5,
        file_wait_max_delay_secs: 1,
    })
}

async fn register_and_claim(api: &ServerApi, config: &AgentConfig) -> Task {
    api.register(&config.client_id, &config.capabilities())
        .await
        .expect("register");
    api.next_task(&config.client_id)
        .await
        .expect("claim")
        .expect("a task should be queued")
}

/// Stands in for the edit bridge: writes a small output file into the
/// requested output directory (or fails), and counts invocations.
struct StubProcessor {
    fail_with: Option<String>,
    calls: AtomicU32,
}

impl StubProcessor {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            fail_with: None,
            calls: AtomicU32::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(message.to_string()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EditProcessor for StubProcessor {
    async fn process(&self, request: &ProcessRequest) -> Result<PathBuf, ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(ProcessorError::Failed(message.clone()));
        }
        let stem = request
            .photo_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_string());
        let output = request.output_dir.join(format!("{stem}_edited.jpg"));
        tokio::fs::write(&output, b"edited bytes")
            .await
            .map_err(|e| ProcessorError::Failed(e.to_string()))?;
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn runner_completes_exchange_task_end_to_end() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let (base, _state) = spawn_server(server_config(exchange_dir.path())).await;
    let client = reqwest::Client::new();

    let task_id = submit_upload_task(&client, &base).await;

    let workspace = TempDir::new().expect("workspace dir");
    let config = test_agent_config(&base, workspace.path());
    let api = ServerApi::new(base.clone(), Duration::from_secs(5)).expect("api client");

    let task = register_and_claim(&api, &config).await;
    assert_eq!(task.id.to_string(), task_id);

    let processor = StubProcessor::succeeding();
    runner::run_task(Arc::clone(&config), api, Arc::clone(&processor), task).await;
    assert_eq!(processor.calls(), 1);

    let task = fetch_task(&client, &base, &task_id).await;
    assert_eq!(task["state"], "completed");
    assert_eq!(task["result"]["success"], true);
    assert!(task["result"]["elapsed_secs"].is_number());
    assert_eq!(task["result"]["result_file"]["type"], "exchange");
    let result_name = format!("{task_id}.result.jpg");
    assert_eq!(
        task["result"]["result_file"]["file"]["file_name"],
        result_name.as_str()
    );

    // The result bytes landed on the server; the scratch dir is gone.
    let stored = std::fs::read(exchange_dir.path().join(&result_name)).expect("result on server");
    assert_eq!(stored, b"edited bytes");
    assert!(!workspace.path().join(&task_id).exists());
}

#[tokio::test]
async fn runner_reports_bridge_failure_and_server_requeues() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let (base, _state) = spawn_server(server_config(exchange_dir.path())).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    let photo = shared.path().join("wedding_042.jpg");
    let preset = shared.path().join("warm_tone.xmp");
    std::fs::write(&photo, PHOTO_BYTES).expect("photo");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");

    let task_id = submit_local_task(&client, &base, &photo, &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let config = test_agent_config(&base, workspace.path());
    let api = ServerApi::new(base.clone(), Duration::from_secs(5)).expect("api client");
    let task = register_and_claim(&api, &config).await;

    let processor = StubProcessor::failing("edit bridge lost the catalog");
    runner::run_task(Arc::clone(&config), api, Arc::clone(&processor), task).await;
    assert_eq!(processor.calls(), 1);

    // One attempt burned; back in the queue for another worker.
    let task = fetch_task(&client, &base, &task_id).await;
    assert_eq!(task["state"], "pending");
    assert_eq!(task["attempt_count"], 1);
    assert!(task["result"].is_null());
}

#[tokio::test]
async fn runner_failure_with_spent_budget_fails_terminally() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let mut config = server_config(exchange_dir.path());
    config.max_attempts = 1;
    let (base, _state) = spawn_server(config).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    let photo = shared.path().join("studio_018.jpg");
    let preset = shared.path().join("matte_look.xmp");
    std::fs::write(&photo, PHOTO_BYTES).expect("photo");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");

    let task_id = submit_local_task(&client, &base, &photo, &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let agent_config = test_agent_config(&base, workspace.path());
    let api = ServerApi::new(base.clone(), Duration::from_secs(5)).expect("api client");
    let task = register_and_claim(&api, &agent_config).await;

    let processor = StubProcessor::failing("develop module crashed");
    runner::run_task(Arc::clone(&agent_config), api, Arc::clone(&processor), task).await;

    // Single-attempt budget: the failure is terminal and keeps the detail.
    let task = fetch_task(&client, &base, &task_id).await;
    assert_eq!(task["state"], "failed");
    assert_eq!(task["result"]["success"], false);
    let error = task["result"]["error"].as_str().expect("error detail");
    assert!(
        error.contains("develop module crashed"),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn runner_requeued_task_fails_terminally_on_second_attempt() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let mut config = server_config(exchange_dir.path());
    config.max_attempts = 2;
    let (base, _state) = spawn_server(config).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    let photo = shared.path().join("gallery_003.jpg");
    let preset = shared.path().join("split_tone.xmp");
    std::fs::write(&photo, PHOTO_BYTES).expect("photo");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");

    let task_id = submit_local_task(&client, &base, &photo, &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let agent_config = test_agent_config(&base, workspace.path());
    let api = ServerApi::new(base.clone(), Duration::from_secs(5)).expect("api client");
    let processor = StubProcessor::failing("export preset missing");

    // First attempt burns one of the two attempts and requeues.
    let task = register_and_claim(&api, &agent_config).await;
    runner::run_task(
        Arc::clone(&agent_config),
        api.clone(),
        Arc::clone(&processor),
        task,
    )
    .await;
    let task = fetch_task(&client, &base, &task_id).await;
    assert_eq!(task["state"], "pending");
    assert_eq!(task["attempt_count"], 1);

    // The second claim spends the budget; this failure is terminal.
    let task = api
        .next_task(&agent_config.client_id)
        .await
        .expect("claim")
        .expect("requeued task");
    runner::run_task(Arc::clone(&agent_config), api, Arc::clone(&processor), task).await;
    assert_eq!(processor.calls(), 2);

    let task = fetch_task(&client, &base, &task_id).await;
    assert_eq!(task["state"], "failed");
    assert_eq!(task["attempt_count"], 2);
    assert_eq!(task["result"]["success"], false);
}

#[tokio::test]
async fn runner_abandons_claim_reclaimed_by_the_sweep() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let (base, state) = spawn_server(server_config(exchange_dir.path())).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    let photo = shared.path().join("portrait_007.jpg");
    let preset = shared.path().join("bw_film.xmp");
    std::fs::write(&photo, PHOTO_BYTES).expect("photo");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");

    let task_id = submit_local_task(&client, &base, &photo, &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let config = test_agent_config(&base, workspace.path());
    let api = ServerApi::new(base.clone(), Duration::from_secs(5)).expect("api client");
    let task = register_and_claim(&api, &config).await;

    // Reclaim the claim with zero windows, as if it sat unconfirmed
    // past the reading timeout.
    let report = state
        .store
        .sweep(
            chrono::Utc::now(),
            Duration::ZERO,
            Duration::ZERO,
            &HashSet::new(),
        )
        .await;
    assert_eq!(report.requeued, 1);

    let processor = StubProcessor::succeeding();
    runner::run_task(Arc::clone(&config), api, Arc::clone(&processor), task).await;

    // The stale worker never ran the edit, and the requeued task is
    // untouched for the next claimant.
    assert_eq!(processor.calls(), 0);
    let task = fetch_task(&client, &base, &task_id).await;
    assert_eq!(task["state"], "pending");
    assert_eq!(task["attempt_count"], 1);
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poller_claims_and_completes_queued_tasks() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let (base, _state) = spawn_server(server_config(exchange_dir.path())).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    for name in ["IMG_0001.jpg", "IMG_0002.jpg"] {
        std::fs::write(shared.path().join(name), PHOTO_BYTES).expect("photo");
    }
    let preset = shared.path().join("sunset_grade.xmp");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");

    let first =
        submit_local_task(&client, &base, &shared.path().join("IMG_0001.jpg"), &preset).await;
    let second =
        submit_local_task(&client, &base, &shared.path().join("IMG_0002.jpg"), &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let config = test_agent_config(&base, workspace.path());
    let servers = vec![ServerConnection::new(
        ServerApi::with_client(reqwest::Client::new(), base.clone()),
        config.retry_backoff(),
        std::time::Instant::now(),
    )];
    let processor = StubProcessor::succeeding();
    let poller = Poller::new(Arc::clone(&config), servers, Arc::clone(&processor));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(poller.run(cancel.clone()));

    let first_done = wait_for_task_state(&client, &base, &first, "completed").await;
    let second_done = wait_for_task_state(&client, &base, &second, "completed").await;
    assert_eq!(first_done["result"]["success"], true);
    assert_eq!(first_done["result"]["result_file"]["type"], "local");
    assert_eq!(second_done["result"]["success"], true);
    assert_eq!(processor.calls(), 2);

    // Outputs landed next to the photos on shared storage.
    assert!(shared.path().join("IMG_0001_edited.jpg").exists());
    assert!(shared.path().join("IMG_0002_edited.jpg").exists());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller should stop after cancel")
        .expect("poller task should not panic");
}

#[tokio::test]
async fn poller_keeps_claiming_while_another_server_is_down() {
    let exchange_dir = TempDir::new().expect("exchange dir");
    let (base, _state) = spawn_server(server_config(exchange_dir.path())).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    let photo = shared.path().join("DSC_1001.jpg");
    let preset = shared.path().join("neutral.xmp");
    std::fs::write(&photo, PHOTO_BYTES).expect("photo");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");
    let task_id = submit_local_task(&client, &base, &photo, &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let config = test_agent_config(&base, workspace.path());
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(200))
        .timeout(Duration::from_secs(2))
        .build()
        .expect("http client");
    let now = std::time::Instant::now();
    // Nothing listens on port 9; the dead connection must not stall
    // claims from the live one.
    let servers = vec![
        ServerConnection::new(
            ServerApi::with_client(http.clone(), "http://127.0.0.1:9".to_string()),
            config.retry_backoff(),
            now,
        ),
        ServerConnection::new(
            ServerApi::with_client(http, base.clone()),
            config.retry_backoff(),
            now,
        ),
    ];
    let processor = StubProcessor::succeeding();
    let poller = Poller::new(Arc::clone(&config), servers, Arc::clone(&processor));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(poller.run(cancel.clone()));

    let done = wait_for_task_state(&client, &base, &task_id, "completed").await;
    assert_eq!(done["result"]["success"], true);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller should stop after cancel")
        .expect("poller task should not panic");
}

#[tokio::test]
async fn poller_drains_tasks_from_every_server() {
    let exchange_a = TempDir::new().expect("exchange dir a");
    let exchange_b = TempDir::new().expect("exchange dir b");
    let (base_a, _state_a) = spawn_server(server_config(exchange_a.path())).await;
    let (base_b, _state_b) = spawn_server(server_config(exchange_b.path())).await;
    let client = reqwest::Client::new();

    let shared = TempDir::new().expect("shared storage");
    for name in ["studio_a.jpg", "studio_b.jpg"] {
        std::fs::write(shared.path().join(name), PHOTO_BYTES).expect("photo");
    }
    let preset = shared.path().join("clean_base.xmp");
    std::fs::write(&preset, PRESET_BYTES).expect("preset");

    let on_a =
        submit_local_task(&client, &base_a, &shared.path().join("studio_a.jpg"), &preset).await;
    let on_b =
        submit_local_task(&client, &base_b, &shared.path().join("studio_b.jpg"), &preset).await;

    let workspace = TempDir::new().expect("workspace dir");
    let config = test_agent_config(&base_a, workspace.path());
    let now = std::time::Instant::now();
    let http = reqwest::Client::new();
    let servers = vec![
        ServerConnection::new(
            ServerApi::with_client(http.clone(), base_a.clone()),
            config.retry_backoff(),
            now,
        ),
        ServerConnection::new(
            ServerApi::with_client(http, base_b.clone()),
            config.retry_backoff(),
            now,
        ),
    ];
    let processor = StubProcessor::succeeding();
    let poller = Poller::new(Arc::clone(&config), servers, Arc::clone(&processor));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(poller.run(cancel.clone()));

    wait_for_task_state(&client, &base_a, &on_a, "completed").await;
    wait_for_task_state(&client, &base_b, &on_b, "completed").await;
    assert_eq!(processor.calls(), 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller should stop after cancel")
        .expect("poller task should not panic");
}
