//! Periodic reclamation of stuck tasks and expired records.
//!
//! One loop drives three policies on a fixed interval:
//! - the task store sweep (requeue or fail tasks stuck in reading or
//!   processing, plus tasks held by stale clients),
//! - eviction of terminal tasks past retention, with their exchange files,
//! - pruning of long-silent clients from the registry.
//!
//! This is the sole recovery path for workers that crash or disconnect
//! without reporting; nothing here depends on a worker saying goodbye.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(state: AppState, cancel: CancellationToken) {
    let config = &state.config;
    tracing::info!(
        interval_secs = config.sweep_interval_secs,
        reading_timeout_secs = config.reading_timeout_secs,
        processing_timeout_secs = config.processing_timeout_secs,
        "Timeout sweeper started"
    );

    let mut interval = tokio::time::interval(config.sweep_interval());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Timeout sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                sweep_once(&state).await;
            }
        }
    }
}

/// One pass over all three policies. Factored out so tests can drive a
/// single pass without the interval loop.
pub async fn sweep_once(state: &AppState) {
    let now = Utc::now();
    let config = &state.config;

    let stale = state
        .registry
        .stale_ids(now, config.client_liveness())
        .await;
    let report = state
        .store
        .sweep(
            now,
            config.reading_timeout(),
            config.processing_timeout(),
            &stale,
        )
        .await;
    if !report.is_empty() {
        tracing::info!(
            requeued = report.requeued,
            failed = report.failed,
            "Sweep reclaimed stuck tasks"
        );
    }

    let evicted = state
        .store
        .evict_terminal(now, config.terminal_retention())
        .await;
    for task_id in evicted {
        if let Err(e) = state.exchange.remove_task_files(task_id).await {
            tracing::error!(%task_id, error = %e, "Failed to remove exchange files for evicted task");
        }
    }

    state.registry.prune(now, config.client_prune_after()).await;
}
