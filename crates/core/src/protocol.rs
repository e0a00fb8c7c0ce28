//! Wire types shared by the server API and the worker agent.
//!
//! Keeping both sides on one set of serde structs is what makes the
//! protocol hard to drift: the agent serializes exactly what the server
//! deserializes.

use serde::{Deserialize, Serialize};

use crate::client::ClientCapabilities;
use crate::task::{FileSource, Outcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub client_id: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextTaskRequest {
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartProcessingRequest {
    pub client_id: String,
}

/// Submission by reference: both paths must already be visible to the
/// workers (shared storage). Upload-based submission goes through the
/// multipart endpoint instead and never uses this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub photo_path: String,
    pub preset_path: String,
}

/// A worker's final word on a claimed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResultRequest {
    pub client_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file: Option<FileSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
}

impl ReportResultRequest {
    /// Collapse the wire shape into the store-level outcome. A failure
    /// without detail still carries a usable error string.
    pub fn into_outcome(self) -> Outcome {
        if self.success {
            Outcome::Success {
                result_file: self.result_file,
                elapsed_secs: self.elapsed_secs,
            }
        } else {
            Outcome::Failure {
                error: self
                    .error
                    .unwrap_or_else(|| "client reported failure without detail".to_string()),
                elapsed_secs: self.elapsed_secs,
            }
        }
    }
}

/// Queue depth broken down by task state. Served by both the stats and
/// health endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub reading: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.reading + self.processing + self.completed + self.failed
    }

    /// Tasks still owed an answer: everything non-terminal.
    pub fn in_flight(&self) -> usize {
        self.pending + self.reading + self.processing
    }
}
