//! `shutterq-agent` -- workstation-side poll agent.
//!
//! Runs next to the editing application, registers with every configured
//! task server, claims queued edits over outbound HTTP polling, drives
//! the local edit bridge, and reports results back. The servers never
//! dial in.
//!
//! # Environment variables
//!
//! | Variable        | Required | Default                 | Description                        |
//! |-----------------|----------|-------------------------|------------------------------------|
//! | `SERVERS`       | yes      | --                      | Comma-separated server base URLs   |
//! | `CLIENT_ID`     | yes      | --                      | Stable identity for this worker    |
//! | `BRIDGE_URL`    | no       | `http://127.0.0.1:9090` | Local edit bridge endpoint         |
//! | `WORKSPACE_DIR` | no       | `workspace`             | Scratch dir for inputs and results |
//!
//! The full set of tuning knobs (poll cadence, backoff, suspension,
//! timeouts) is documented on [`AgentConfig::from_env`].

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shutterq_agent::api::ServerApi;
use shutterq_agent::config::AgentConfig;
use shutterq_agent::connection::ServerConnection;
use shutterq_agent::poller::Poller;
use shutterq_agent::processor::BridgeProcessor;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shutterq_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(message) => {
            tracing::error!("{message}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        client_id = %config.client_id,
        servers = config.servers.len(),
        slots = config.processing_slots,
        bridge = %config.bridge_url,
        "Starting shutterq-agent"
    );

    if let Err(e) = tokio::fs::create_dir_all(&config.workspace_dir).await {
        tracing::error!(
            dir = %config.workspace_dir.display(),
            error = %e,
            "Cannot create workspace directory"
        );
        std::process::exit(1);
    }

    // One pooled HTTP client shared by every server connection.
    let http = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(config.http_timeout())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Cannot build HTTP client");
            std::process::exit(1);
        }
    };

    let now = std::time::Instant::now();
    let servers = config
        .servers
        .iter()
        .map(|url| {
            ServerConnection::new(
                ServerApi::with_client(http.clone(), url.clone()),
                config.retry_backoff(),
                now,
            )
        })
        .collect();

    let processor = Arc::new(BridgeProcessor::new(config.bridge_url.clone()));
    let poller = Poller::new(Arc::clone(&config), servers, processor);

    let cancel = tokio_util::sync::CancellationToken::new();
    let poller_handle = tokio::spawn(poller.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();

    // The poller drains in-flight tasks itself; allow it that budget
    // plus a little slack before abandoning the join.
    let grace = config.shutdown_timeout() + Duration::from_secs(5);
    if tokio::time::timeout(grace, poller_handle).await.is_err() {
        tracing::warn!("Poller did not stop in time; exiting anyway");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the agent
/// stops cleanly whether run interactively or under a service manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
