//! Registry of known worker clients and their liveness.
//!
//! Liveness here only affects reporting and early-reassignment hints for
//! the sweep; it never revokes a claim by itself. Task recovery stays the
//! task store's job so the two policies cannot disagree about ownership.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use shutterq_core::client::{ClientCapabilities, ClientRecord};
use shutterq_core::error::CoreError;
use shutterq_core::types::{validate_client_id, Timestamp};

pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientRecord>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker, or refresh it if the id is already known.
    /// Re-registration replaces the capabilities and counts as a sighting.
    pub async fn register(
        &self,
        client_id: &str,
        capabilities: ClientCapabilities,
        now: Timestamp,
    ) -> Result<ClientRecord, CoreError> {
        validate_client_id(client_id)?;

        let mut clients = self.clients.write().await;
        let record = match clients.get_mut(client_id) {
            Some(existing) => {
                existing.capabilities = capabilities;
                existing.touch(now);
                debug!("Client {client_id} re-registered");
                existing.clone()
            }
            None => {
                info!("Client {client_id} registered");
                let record = ClientRecord::new(client_id.to_string(), capabilities, now);
                clients.insert(client_id.to_string(), record.clone());
                record
            }
        };
        Ok(record)
    }

    /// Record a sighting of the client. Returns false for unknown ids so
    /// callers can demand registration first.
    pub async fn heartbeat(&self, client_id: &str, now: Timestamp) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(client_id) {
            Some(record) => {
                record.touch(now);
                true
            }
            None => false,
        }
    }

    pub async fn record_claim(&self, client_id: &str, now: Timestamp) {
        let mut clients = self.clients.write().await;
        if let Some(record) = clients.get_mut(client_id) {
            record.tasks_claimed += 1;
            record.touch(now);
        }
    }

    pub async fn record_outcome(&self, client_id: &str, success: bool, now: Timestamp) {
        let mut clients = self.clients.write().await;
        if let Some(record) = clients.get_mut(client_id) {
            if success {
                record.tasks_completed += 1;
            } else {
                record.tasks_failed += 1;
            }
            record.touch(now);
        }
    }

    pub async fn get(&self, client_id: &str) -> Option<ClientRecord> {
        self.clients.read().await.get(client_id).cloned()
    }

    pub async fn is_registered(&self, client_id: &str) -> bool {
        self.clients.read().await.contains_key(client_id)
    }

    /// All records, ordered by id for stable listings.
    pub async fn list(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> = self.clients.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        records
    }

    /// Clients seen within the liveness window.
    pub async fn active_count(&self, now: Timestamp, liveness: Duration) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| !c.is_stale(now, liveness))
            .count()
    }

    /// Ids of clients silent past the liveness window. Fed to the task
    /// store's sweep so their in-flight claims come back early.
    pub async fn stale_ids(&self, now: Timestamp, liveness: Duration) -> HashSet<String> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.is_stale(now, liveness))
            .map(|c| c.client_id.clone())
            .collect()
    }

    /// Forget clients silent for longer than `retention`. Workers that come
    /// back simply register again.
    pub async fn prune(&self, now: Timestamp, retention: Duration) -> usize {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|_, c| !c.is_stale(now, retention));
        let pruned = before - clients.len();
        if pruned > 0 {
            info!("Pruned {pruned} long-silent clients from the registry");
        }
        pruned
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
