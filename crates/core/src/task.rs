//! Task records and the state machine they move through.
//!
//! A task is created in `Pending`, claimed into `Reading`, confirmed into
//! `Processing`, and finishes in `Completed` or `Failed`. Timeouts and
//! failure reports send it back to `Pending` while retry budget remains.
//! Terminal states never change again.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::files::StoredFile;
use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Reading,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Reading => "reading",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// Terminal states are immutable: no transition ever leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Whether `self -> next` is a legal edge of the task state machine.
    ///
    /// `Reading -> Pending` and `Processing -> Pending` are the requeue
    /// edges (timeout sweep or failure with budget remaining);
    /// `Reading -> Failed` only happens when the sweep reclaims a task
    /// whose retry budget is already spent.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Reading)
                | (Reading, Processing)
                | (Reading, Pending)
                | (Reading, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Where an input or result artifact lives.
///
/// `Local` paths are only meaningful when server and worker share storage;
/// `Exchange` entries were uploaded into the server's exchange directory
/// and are fetched over the download endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileSource {
    Local { path: String },
    Exchange { file: StoredFile },
}

impl FileSource {
    pub fn is_exchange(&self) -> bool {
        matches!(self, FileSource::Exchange { .. })
    }
}

/// Input references for one editing job: the photo to edit and the
/// preset/settings file describing the edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub photo: FileSource,
    pub preset: FileSource,
}

// ---------------------------------------------------------------------------
// Outcome and result
// ---------------------------------------------------------------------------

/// What a worker reports back after driving local processing.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        result_file: Option<FileSource>,
        elapsed_secs: Option<f64>,
    },
    Failure {
        error: String,
        elapsed_secs: Option<f64>,
    },
}

/// Final record stored on a terminal task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<FileSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
    pub completed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// One unit of work tracked through the state machine. Owned exclusively
/// by the task store; everything handed out over the API is a clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub payload: TaskPayload,
    /// Set iff state is `Reading` or `Processing`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_client_id: Option<String>,
    pub created_at: Timestamp,
    pub state_entered_at: Timestamp,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(payload: TaskPayload, now: Timestamp) -> Self {
        Self::with_id(uuid::Uuid::now_v7(), payload, now)
    }

    /// Build a task with a caller-minted id. Upload submissions mint the id
    /// first so the exchange can file the inputs under it before the task
    /// becomes claimable.
    pub fn with_id(id: TaskId, payload: TaskPayload, now: Timestamp) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            payload,
            assigned_client_id: None,
            created_at: now,
            state_entered_at: now,
            attempt_count: 0,
            result: None,
        }
    }

    /// Move to `next`, stamping `state_entered_at`, or reject the edge.
    ///
    /// Ownership checks (does this client hold the task) are the store's
    /// job; this only enforces the state machine itself.
    pub fn transition(&mut self, next: TaskState, now: Timestamp) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition(format!(
                "task {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.state_entered_at = now;
        Ok(())
    }

    /// How long the task has sat in its current state.
    pub fn state_age(&self, now: Timestamp) -> chrono::Duration {
        now.signed_duration_since(self.state_entered_at)
    }

    /// Whether `client_id` currently owns this task.
    pub fn is_assigned_to(&self, client_id: &str) -> bool {
        self.assigned_client_id.as_deref() == Some(client_id)
    }
}
