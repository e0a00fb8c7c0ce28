//! REST client for one task server.
//!
//! Wraps the server's HTTP protocol surface (registration, polling,
//! confirmation, reporting, artifact transfer) using [`reqwest`]. One
//! instance per configured server; all instances share a connection pool
//! via [`ServerApi::with_client`].

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use shutterq_core::client::{ClientCapabilities, ClientRecord};
use shutterq_core::files::{FileKind, StoredFile};
use shutterq_core::protocol::ReportResultRequest;
use shutterq_core::task::Task;
use shutterq_core::types::TaskId;

/// HTTP client for a single task server.
#[derive(Clone)]
pub struct ServerApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the server API layer.
#[derive(Debug, thiserror::Error)]
pub enum ServerApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Reading or writing a local file during a transfer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a non-2xx status.
    #[error("Server error ({status}) {code}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Stable error code from the response body.
        code: String,
        /// Human-readable message from the response body.
        message: String,
    },
}

impl ServerApiError {
    /// The server rejected a state transition (stale claim, wrong owner).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }

    /// The referenced artifact exists but its bytes are not published yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::Api { code, .. } if code == "FILE_NOT_READY")
    }

    /// The server does not know this client id. Happens after a server
    /// restart; the fix is to register again.
    pub fn is_unknown_client(&self) -> bool {
        matches!(self, Self::Api { status: 404, code, .. } if code == "NOT_FOUND")
    }

    /// A transport-level failure, counted against the server's health.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// Envelope every successful JSON response is wrapped in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Error body shape shared by all server errors.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

impl ServerApi {
    /// Create a new API client for a task server.
    ///
    /// * `base_url` - Base HTTP URL without a trailing slash,
    ///   e.g. `http://192.168.1.10:8080`.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ServerApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple servers).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the server's health endpoint.
    pub async fn health(&self) -> Result<(), ServerApiError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Register (or refresh) this worker with the server.
    pub async fn register(
        &self,
        client_id: &str,
        capabilities: &ClientCapabilities,
    ) -> Result<ClientRecord, ServerApiError> {
        let body = serde_json::json!({
            "client_id": client_id,
            "capabilities": capabilities,
        });

        let response = self
            .client
            .post(format!("{}/api/v1/clients/register", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Poll for the next pending task. `Ok(None)` means the queue is empty.
    pub async fn next_task(&self, client_id: &str) -> Result<Option<Task>, ServerApiError> {
        let body = serde_json::json!({ "client_id": client_id });

        let response = self
            .client
            .post(format!("{}/api/v1/tasks/next", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Confirm that processing of a claimed task is starting.
    pub async fn start_processing(
        &self,
        task_id: TaskId,
        client_id: &str,
    ) -> Result<Task, ServerApiError> {
        let body = serde_json::json!({ "client_id": client_id });

        let response = self
            .client
            .post(format!("{}/api/v1/tasks/{task_id}/start", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Report the final outcome of a task this worker was processing.
    pub async fn report_result(
        &self,
        task_id: TaskId,
        report: &ReportResultRequest,
    ) -> Result<Task, ServerApiError> {
        let response = self
            .client
            .post(format!("{}/api/v1/tasks/{task_id}/result", self.base_url))
            .json(report)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download a task artifact into `dest`, streaming to disk.
    ///
    /// Returns the number of bytes written. A `FILE_NOT_READY` answer is
    /// surfaced as [`ServerApiError::Api`]; the caller owns the retry
    /// policy.
    pub async fn download_file(
        &self,
        task_id: TaskId,
        kind: FileKind,
        dest: &Path,
    ) -> Result<u64, ServerApiError> {
        let response = self
            .client
            .get(format!(
                "{}/api/v1/tasks/{task_id}/files/{kind}",
                self.base_url
            ))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Upload the result artifact for a task this worker is processing.
    pub async fn upload_result(
        &self,
        task_id: TaskId,
        client_id: &str,
        path: &Path,
    ) -> Result<StoredFile, ServerApiError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "result".to_string());

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(ReaderStream::new(file)),
            size,
        )
        .file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("client_id", client_id.to_string())
            .part("file", part);

        let response = self
            .client
            .post(format!(
                "{}/api/v1/tasks/{task_id}/files/result",
                self.base_url
            ))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. On failure, parse
    /// the server's `{"error", "code"}` body into a structured
    /// [`ServerApiError::Api`], falling back to the raw text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ServerApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => (parsed.code, parsed.error),
                Err(_) => ("UNKNOWN".to_string(), body),
            };
            return Err(ServerApiError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }
        Ok(response)
    }

    /// Parse a successful response body as `{"data": T}`.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServerApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Envelope<T>>().await?.data)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ServerApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
