//! Handlers for artifact transfer: workers download task inputs and upload
//! result files here.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use tokio_util::io::ReaderStream;

use shutterq_core::error::CoreError;
use shutterq_core::files::{content_type_for_extension, FileKind};
use shutterq_core::task::{FileSource, TaskState};
use shutterq_core::types::TaskId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}/files/{kind}
///
/// Stream a task artifact (`photo`, `preset` or `result`). Exchange-backed
/// artifacts that are referenced but not yet published are waited for with
/// bounded backoff, then surfaced as 503 FileNotReady so the caller can
/// retry; plain missing files are 404.
pub async fn download_file(
    State(state): State<AppState>,
    Path((id, kind_raw)): Path<(TaskId, String)>,
) -> AppResult<Response> {
    let kind: FileKind = kind_raw.parse().map_err(AppError::Core)?;
    let task = state
        .store
        .get(id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "task",
            id: id.to_string(),
        }))?;

    let source = match kind {
        FileKind::Photo => task.payload.photo.clone(),
        FileKind::Preset => task.payload.preset.clone(),
        FileKind::Result => task
            .result
            .as_ref()
            .and_then(|r| r.result_file.clone())
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "file",
                id: kind.stem(id),
            }))?,
    };

    match source {
        FileSource::Local { path } => stream_local_file(&path).await,
        FileSource::Exchange { file } => {
            stream_exchange_file(&state, id, kind, &file.file_name).await
        }
    }
}

/// Stream a file from shared storage. No wait policy here: a missing local
/// path is a submitter problem the server cannot see progress on.
async fn stream_local_file(path: &str) -> AppResult<Response> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::Core(CoreError::NotFound {
                entity: "file",
                id: path.to_string(),
            })
        } else {
            AppError::InternalError(format!("opening {path}: {e}"))
        }
    })?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    let filename = path.rsplit(['/', '\\']).next().unwrap_or("artifact");
    let ext = filename.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    file_response(
        file,
        size,
        content_type_for_extension(&ext.to_ascii_lowercase()),
        filename,
    )
}

/// Stream an exchange artifact, waiting out the publish race if the stored
/// name is not there yet (e.g. a re-upload replaced the extension).
async fn stream_exchange_file(
    state: &AppState,
    id: TaskId,
    kind: FileKind,
    file_name: &str,
) -> AppResult<Response> {
    let (file, size, content_type, name) = match state.exchange.open(file_name).await {
        Ok((file, size, content_type)) => (file, size, content_type, file_name.to_string()),
        Err(CoreError::NotFound { .. }) => {
            let found = state.exchange.wait_ready(id, kind).await?;
            let (file, size, content_type) = state.exchange.open(&found.file_name).await?;
            (file, size, content_type, found.file_name)
        }
        Err(e) => return Err(e.into()),
    };
    file_response(file, size, content_type, &name)
}

fn file_response(
    file: tokio::fs::File,
    size: u64,
    content_type: &str,
    filename: &str,
) -> AppResult<Response> {
    let stream = ReaderStream::new(file);
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", header_safe_filename(filename)),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(format!("building download response: {e}")))
}

/// Replace bytes that cannot sit inside a quoted header value. Local
/// filenames come straight from submitter paths, and Unix allows control
/// characters and quotes in them.
fn header_safe_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_control() || c == '"' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/files/{kind}
///
/// Upload the result artifact for a task this worker is processing.
/// Multipart fields: `client_id` (text) and `file`. Only `kind=result` is
/// accepted; inputs enter the exchange through task submission alone.
pub async fn upload_result(
    State(state): State<AppState>,
    Path((id, kind_raw)): Path<(TaskId, String)>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<shutterq_core::files::StoredFile>>)> {
    let kind: FileKind = kind_raw.parse().map_err(AppError::Core)?;
    if kind != FileKind::Result {
        return Err(AppError::Core(CoreError::Validation(format!(
            "only result uploads are accepted, not {kind}"
        ))));
    }

    let task = state
        .store
        .get(id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "task",
            id: id.to_string(),
        }))?;

    let mut client_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "client_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                client_id = Some(text);
            }
            "file" => {
                let filename = field.file_name().unwrap_or("result").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file = Some((filename, data.to_vec()));
            }
            _ => {} // ignore unknown fields
        }
    }

    let client_id = client_id
        .ok_or_else(|| AppError::BadRequest("Missing required 'client_id' field".into()))?;
    let (filename, data) =
        file.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;

    // Early rejection of obviously stale uploaders. The report call holds
    // the authoritative guard; this just keeps a reclaimed worker from
    // overwriting its successor's artifact in the common case.
    if task.state != TaskState::Processing || !task.is_assigned_to(&client_id) {
        return Err(AppError::Core(CoreError::InvalidTransition(format!(
            "result upload by {client_id} rejected: task {id} is {} (owner: {})",
            task.state,
            task.assigned_client_id.as_deref().unwrap_or("none")
        ))));
    }
    state.registry.heartbeat(&client_id, Utc::now()).await;

    let stored = state
        .exchange
        .store(id, FileKind::Result, &filename, &data)
        .await?;

    tracing::info!(
        "Task {id} result uploaded by {client_id}: {} ({} bytes)",
        stored.file_name,
        stored.size_bytes
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: stored })))
}
