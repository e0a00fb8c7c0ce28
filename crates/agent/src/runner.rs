//! Execution of a single claimed task: confirm, fetch inputs, run the
//! edit under a preset-derived deadline, deliver the result, report.
//!
//! Every path out of [`run_task`] either reports an outcome to the server
//! or deliberately abandons the claim to the server's timeout sweep (when
//! the claim is already stale or the server is unreachable).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use shutterq_core::files::FileKind;
use shutterq_core::protocol::ReportResultRequest;
use shutterq_core::task::{FileSource, Task};
use shutterq_core::types::TaskId;

use crate::api::{ServerApi, ServerApiError};
use crate::backoff;
use crate::config::AgentConfig;
use crate::processor::{EditProcessor, ProcessRequest, ProcessorError};

/// Why a task attempt failed. The display string is what the server (and
/// ultimately the submitter) sees as the error.
#[derive(Debug, thiserror::Error)]
enum TaskFailure {
    #[error("workspace setup failed: {0}")]
    Workspace(std::io::Error),

    #[error("failed to fetch {kind}: {detail}")]
    Fetch { kind: FileKind, detail: String },

    #[error("processing timed out after {budget_secs}s")]
    Timeout { budget_secs: u64 },

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error("processor reported {path} but it never appeared")]
    OutputMissing { path: String },

    #[error("result upload failed: {0}")]
    Upload(ServerApiError),
}

/// Run one claimed task to completion and report the outcome.
pub async fn run_task<P>(config: Arc<AgentConfig>, api: ServerApi, processor: Arc<P>, task: Task)
where
    P: EditProcessor + ?Sized,
{
    let task_id = task.id;
    let started = Instant::now();

    // Confirm before touching any inputs, so a download failure is still
    // reportable from the processing state.
    match api.start_processing(task_id, &config.client_id).await {
        Ok(_) => {}
        Err(e) if e.is_conflict() => {
            tracing::warn!(%task_id, error = %e, "Claim went stale before start; abandoning");
            return;
        }
        Err(e) => {
            tracing::error!(
                %task_id,
                error = %e,
                "Could not confirm processing; leaving the claim to the sweep"
            );
            return;
        }
    }

    match execute(&config, &api, processor.as_ref(), &task).await {
        Ok((result_file, elapsed)) => {
            let report = ReportResultRequest {
                client_id: config.client_id.clone(),
                success: true,
                error: None,
                result_file: Some(result_file),
                elapsed_secs: Some(elapsed.as_secs_f64()),
            };
            deliver_report(&api, task_id, &report).await;
            tracing::info!(
                %task_id,
                elapsed_secs = elapsed.as_secs_f64(),
                "Task completed"
            );
        }
        Err(failure) => {
            tracing::warn!(%task_id, error = %failure, "Task attempt failed");
            let report = ReportResultRequest {
                client_id: config.client_id.clone(),
                success: false,
                error: Some(failure.to_string()),
                result_file: None,
                elapsed_secs: Some(started.elapsed().as_secs_f64()),
            };
            deliver_report(&api, task_id, &report).await;
        }
    }

    cleanup_workspace(&config, task_id).await;
}

/// The fallible middle of a task: fetch, estimate, edit, deliver.
async fn execute<P>(
    config: &AgentConfig,
    api: &ServerApi,
    processor: &P,
    task: &Task,
) -> Result<(FileSource, std::time::Duration), TaskFailure>
where
    P: EditProcessor + ?Sized,
{
    let task_dir = config.workspace_dir.join(task.id.to_string());
    tokio::fs::create_dir_all(&task_dir)
        .await
        .map_err(TaskFailure::Workspace)?;

    let photo_path =
        materialize(config, api, task.id, FileKind::Photo, &task.payload.photo, &task_dir).await?;
    let preset_path = materialize(
        config,
        api,
        task.id,
        FileKind::Preset,
        &task.payload.preset,
        &task_dir,
    )
    .await?;

    // The preset text drives the processing budget.
    let policy = config.timeout_policy();
    let estimate = match tokio::fs::read_to_string(&preset_path).await {
        Ok(text) => policy.estimate(&text),
        Err(e) => {
            tracing::warn!(
                task_id = %task.id,
                error = %e,
                "Preset is not valid text; using the fallback budget"
            );
            policy.unreadable_default
        }
    };
    let budget = estimate + config.processing_buffer();

    // Results land next to a shared-storage photo, or in the private
    // task workspace when the inputs came through the exchange.
    let output_dir = match &task.payload.photo {
        FileSource::Local { path } => Path::new(path)
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| task_dir.clone()),
        FileSource::Exchange { .. } => task_dir.clone(),
    };

    let request = ProcessRequest {
        task_id: task.id,
        photo_path,
        preset_path,
        output_dir,
    };

    tracing::info!(
        task_id = %task.id,
        budget_secs = budget.as_secs(),
        "Starting edit"
    );
    let edit_started = Instant::now();
    let output = match tokio::time::timeout(budget, processor.process(&request)).await {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => return Err(TaskFailure::Processor(e)),
        Err(_) => {
            return Err(TaskFailure::Timeout {
                budget_secs: budget.as_secs(),
            })
        }
    };
    let elapsed = edit_started.elapsed();

    wait_for_output(config, &output).await?;

    // Deliver the result the same way the inputs came in.
    let result_file = match &task.payload.photo {
        FileSource::Exchange { .. } => {
            let stored = api
                .upload_result(task.id, &config.client_id, &output)
                .await
                .map_err(TaskFailure::Upload)?;
            FileSource::Exchange { file: stored }
        }
        FileSource::Local { .. } => FileSource::Local {
            path: output.to_string_lossy().into_owned(),
        },
    };

    Ok((result_file, elapsed))
}

/// Make one input readable on this machine: shared-storage paths are
/// checked, exchange artifacts are downloaded into the task workspace.
async fn materialize(
    config: &AgentConfig,
    api: &ServerApi,
    task_id: TaskId,
    kind: FileKind,
    source: &FileSource,
    task_dir: &Path,
) -> Result<PathBuf, TaskFailure> {
    match source {
        FileSource::Local { path } => {
            let path = PathBuf::from(path);
            tokio::fs::metadata(&path)
                .await
                .map_err(|e| TaskFailure::Fetch {
                    kind,
                    detail: format!("{} is not readable: {e}", path.display()),
                })?;
            Ok(path)
        }
        FileSource::Exchange { file } => {
            let dest = task_dir.join(&file.file_name);
            download_with_retry(config, api, task_id, kind, &dest).await?;
            Ok(dest)
        }
    }
}

/// Download one artifact, waiting out the publish race with bounded
/// exponential backoff. Not-ready answers are retried until the file-wait
/// budget runs out; every other error is final.
async fn download_with_retry(
    config: &AgentConfig,
    api: &ServerApi,
    task_id: TaskId,
    kind: FileKind,
    dest: &Path,
) -> Result<(), TaskFailure> {
    let backoff_config = config.file_wait_backoff();
    let deadline = Instant::now() + config.file_wait_timeout();
    let mut delay = backoff_config.base_delay;

    loop {
        match api.download_file(task_id, kind, dest).await {
            Ok(bytes) => {
                tracing::debug!(%task_id, %kind, bytes, "Input downloaded");
                return Ok(());
            }
            Err(e) if e.is_not_ready() => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(TaskFailure::Fetch {
                        kind,
                        detail: format!(
                            "not published within {}s",
                            config.file_wait_timeout_secs
                        ),
                    });
                }
                let sleep_for = delay.min(deadline - now);
                tracing::debug!(
                    %task_id,
                    %kind,
                    delay_ms = sleep_for.as_millis() as u64,
                    "Input not published yet; waiting"
                );
                tokio::time::sleep(sleep_for).await;
                delay = backoff::next_delay(delay, &backoff_config);
            }
            Err(e) => {
                return Err(TaskFailure::Fetch {
                    kind,
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Wait for the processor's output file to exist with non-zero size.
/// Editing applications often acknowledge completion a moment before the
/// file is fully flushed.
async fn wait_for_output(config: &AgentConfig, path: &Path) -> Result<(), TaskFailure> {
    let backoff_config = config.file_wait_backoff();
    let deadline = Instant::now() + config.file_wait_timeout();
    let mut delay = backoff_config.base_delay;

    loop {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.len() > 0 {
                return Ok(());
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(TaskFailure::OutputMissing {
                path: path.display().to_string(),
            });
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = backoff::next_delay(delay, &backoff_config);
    }
}

/// Push the final report. A conflict here means the sweep reclaimed the
/// task mid-flight; the result is dropped and the next owner redoes it.
async fn deliver_report(api: &ServerApi, task_id: TaskId, report: &ReportResultRequest) {
    match api.report_result(task_id, report).await {
        Ok(task) => {
            tracing::debug!(%task_id, state = %task.state, "Report accepted");
        }
        Err(e) if e.is_conflict() => {
            tracing::warn!(
                %task_id,
                error = %e,
                "Report rejected as stale; the server reassigned the task"
            );
        }
        Err(e) => {
            tracing::error!(%task_id, error = %e, "Failed to deliver report");
        }
    }
}

/// Remove the task's scratch directory. Shared-storage results are not
/// touched; only downloaded inputs and exchange-bound outputs live here.
async fn cleanup_workspace(config: &AgentConfig, task_id: TaskId) {
    let task_dir = config.workspace_dir.join(task_id.to_string());
    if let Err(e) = tokio::fs::remove_dir_all(&task_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%task_id, error = %e, "Failed to clean task workspace");
        }
    }
}
