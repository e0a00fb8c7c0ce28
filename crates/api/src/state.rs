use std::sync::Arc;

use shutterq_core::error::CoreError;
use shutterq_store::{ClientRegistry, FileExchange, TaskStore};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Task queue and state machine.
    pub store: Arc<TaskStore>,
    /// Known workers and their liveness.
    pub registry: Arc<ClientRegistry>,
    /// On-disk artifact exchange.
    pub exchange: Arc<FileExchange>,
}

impl AppState {
    /// Assemble the full state from configuration, creating the exchange
    /// directory if needed. Used by both `main` and the integration tests.
    pub async fn build(config: ServerConfig) -> Result<Self, CoreError> {
        let exchange =
            FileExchange::new(&config.exchange_dir, config.file_limits(), config.file_wait())
                .await?;

        Ok(Self {
            store: Arc::new(TaskStore::new(config.task_capacity, config.max_attempts)),
            registry: Arc::new(ClientRegistry::new()),
            exchange: Arc::new(exchange),
            config: Arc::new(config),
        })
    }
}
