//! The edit-processor seam: how a claimed task's photo actually gets its
//! preset applied.
//!
//! The poller and runner only know the [`EditProcessor`] trait. The
//! production implementation is [`BridgeProcessor`], which hands the work
//! to a local HTTP bridge in front of the editing application; tests plug
//! in stubs.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use shutterq_core::types::TaskId;

/// Everything a processor needs to run one edit.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub task_id: TaskId,
    /// Input photo, readable on this machine.
    pub photo_path: PathBuf,
    /// Preset to apply, readable on this machine.
    pub preset_path: PathBuf,
    /// Directory the result must be written into.
    pub output_dir: PathBuf,
}

/// Errors from an edit processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The HTTP request to the bridge failed (network, bridge down).
    #[error("Bridge request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The bridge answered with a non-2xx status.
    #[error("Bridge error ({status}): {body}")]
    Bridge {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The edit ran but produced no usable output.
    #[error("Processing failed: {0}")]
    Failed(String),
}

/// Applies a preset to a photo and yields the output path.
///
/// Implementations must be cancel-safe: the runner aborts the future when
/// the processing deadline expires, and the task is then reported failed.
#[async_trait]
pub trait EditProcessor: Send + Sync {
    async fn process(&self, request: &ProcessRequest) -> Result<PathBuf, ProcessorError>;
}

// ---------------------------------------------------------------------------
// HTTP bridge implementation
// ---------------------------------------------------------------------------

/// Response returned by the bridge's `/process` endpoint.
#[derive(Debug, Deserialize)]
struct BridgeResponse {
    /// Where the bridge wrote the edited photo.
    output_path: PathBuf,
}

/// Production processor: POSTs the job to a local edit bridge and waits
/// for it to finish.
///
/// The client is built without a total request timeout -- edits run for
/// minutes. The runner enforces the estimate-derived deadline around the
/// whole call instead.
pub struct BridgeProcessor {
    client: reqwest::Client,
    bridge_url: String,
}

impl BridgeProcessor {
    pub fn new(bridge_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bridge_url,
        }
    }
}

#[async_trait]
impl EditProcessor for BridgeProcessor {
    async fn process(&self, request: &ProcessRequest) -> Result<PathBuf, ProcessorError> {
        let body = serde_json::json!({
            "task_id": request.task_id,
            "photo_path": request.photo_path,
            "preset_path": request.preset_path,
            "output_dir": request.output_dir,
        });

        tracing::debug!(
            task_id = %request.task_id,
            bridge = %self.bridge_url,
            "Submitting edit to bridge"
        );

        let response = self
            .client
            .post(format!("{}/process", self.bridge_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProcessorError::Bridge {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<BridgeResponse>().await?;
        Ok(parsed.output_path)
    }
}
