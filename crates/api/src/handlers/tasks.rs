//! Handlers for task submission and the worker claim/confirm/report
//! protocol.
//!
//! Every worker-facing call counts as a sighting for liveness, so a busy
//! worker never reads as stale even when it polls rarely.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use shutterq_core::error::CoreError;
use shutterq_core::files::FileKind;
use shutterq_core::protocol::{
    NextTaskRequest, ReportResultRequest, StartProcessingRequest, SubmitTaskRequest,
};
use shutterq_core::task::{FileSource, Task, TaskPayload};
use shutterq_core::types::TaskId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reject protocol calls from ids the registry has never seen. Workers must
/// register before polling; everything after that refreshes liveness.
async fn require_registered(state: &AppState, client_id: &str) -> AppResult<()> {
    if !state.registry.is_registered(client_id).await {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "client",
            id: client_id.to_string(),
        }));
    }
    state.registry.heartbeat(client_id, Utc::now()).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Submit a task whose photo and preset already sit on storage the workers
/// can reach. The server does not check the paths exist -- shared mounts
/// are often visible to the workers only.
pub async fn submit_task(
    State(state): State<AppState>,
    Json(input): Json<SubmitTaskRequest>,
) -> AppResult<impl IntoResponse> {
    if input.photo_path.trim().is_empty() || input.preset_path.trim().is_empty() {
        return Err(AppError::BadRequest(
            "photo_path and preset_path must both be non-empty".into(),
        ));
    }

    let payload = TaskPayload {
        photo: FileSource::Local {
            path: input.photo_path,
        },
        preset: FileSource::Local {
            path: input.preset_path,
        },
    };
    let task = state.store.submit(payload, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: task })))
}

/// POST /api/v1/tasks/upload
///
/// Submit a task with its inputs attached as multipart fields `photo` and
/// `preset`. Both files are published into the exchange before the task is
/// enqueued, so a claimed task always has downloadable inputs.
pub async fn submit_task_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut photo: Option<(String, Vec<u8>)> = None;
    let mut preset: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "photo" => {
                let filename = field.file_name().unwrap_or("photo").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                photo = Some((filename, data.to_vec()));
            }
            "preset" => {
                let filename = field.file_name().unwrap_or("preset").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                preset = Some((filename, data.to_vec()));
            }
            _ => {} // ignore unknown fields
        }
    }

    let (photo_name, photo_data) =
        photo.ok_or_else(|| AppError::BadRequest("Missing required 'photo' field".into()))?;
    let (preset_name, preset_data) =
        preset.ok_or_else(|| AppError::BadRequest("Missing required 'preset' field".into()))?;

    // Mint the id up front so the artifacts are filed under the task that
    // will own them.
    let task_id = TaskId::now_v7();
    let photo_file = state
        .exchange
        .store(task_id, FileKind::Photo, &photo_name, &photo_data)
        .await?;
    let preset_file = match state
        .exchange
        .store(task_id, FileKind::Preset, &preset_name, &preset_data)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            // The photo already landed; do not leave it orphaned.
            let _ = state.exchange.remove_task_files(task_id).await;
            return Err(e.into());
        }
    };

    let payload = TaskPayload {
        photo: FileSource::Exchange { file: photo_file },
        preset: FileSource::Exchange { file: preset_file },
    };
    let task = match state.store.submit_with_id(task_id, payload, Utc::now()).await {
        Ok(task) => task,
        Err(e) => {
            // The queue refused the task (capacity, most likely); do not
            // leave orphaned artifacts behind.
            let _ = state.exchange.remove_task_files(task_id).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        "Task {} submitted with uploaded inputs ({} + {} bytes)",
        task.id,
        photo_data.len(),
        preset_data.len()
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: task })))
}

// ---------------------------------------------------------------------------
// Worker protocol
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/next
///
/// Claim the oldest pending task for this worker. Responds `{"data": null}`
/// when the queue has nothing, which is the normal idle answer -- workers
/// distinguish it from errors by status code alone.
pub async fn next_task(
    State(state): State<AppState>,
    Json(input): Json<NextTaskRequest>,
) -> AppResult<impl IntoResponse> {
    require_registered(&state, &input.client_id).await?;

    let claimed = state.store.claim_next(&input.client_id, Utc::now()).await?;
    if claimed.is_some() {
        state
            .registry
            .record_claim(&input.client_id, Utc::now())
            .await;
    }

    Ok(Json(DataResponse::<Option<Task>> { data: claimed }))
}

/// GET /api/v1/tasks/{id}
///
/// Current snapshot of a task, including its result once terminal.
pub async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let task = state
        .store
        .get(id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "task",
            id: id.to_string(),
        }))?;

    Ok(Json(DataResponse { data: task }))
}

/// POST /api/v1/tasks/{id}/start
///
/// Worker confirmation that it fetched the inputs and is starting local
/// processing. Returns 409 if the claim went stale (timeout sweep or
/// reassignment won the race).
pub async fn start_processing(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Json(input): Json<StartProcessingRequest>,
) -> AppResult<impl IntoResponse> {
    require_registered(&state, &input.client_id).await?;

    let task = state
        .store
        .confirm_processing(id, &input.client_id, Utc::now())
        .await?;

    Ok(Json(DataResponse { data: task }))
}

/// POST /api/v1/tasks/{id}/result
///
/// Worker's final report for a task it is processing. Success carries the
/// result reference (uploaded beforehand); failure lets the server decide
/// between requeue and terminal failure.
pub async fn report_result(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Json(input): Json<ReportResultRequest>,
) -> AppResult<impl IntoResponse> {
    let client_id = input.client_id.clone();
    let success = input.success;
    require_registered(&state, &client_id).await?;

    let task = state
        .store
        .report_result(id, &client_id, input.into_outcome(), Utc::now())
        .await?;
    state
        .registry
        .record_outcome(&client_id, success, Utc::now())
        .await;

    Ok(Json(DataResponse { data: task }))
}
