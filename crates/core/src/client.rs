//! Worker client records tracked by the server-side registry.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Self-reported worker properties, sent once at registration. All fields
/// are optional so older agents keep registering cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// How many tasks the worker is willing to process concurrently.
    #[serde(default = "default_slots")]
    pub processing_slots: u32,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            hostname: None,
            agent_version: None,
            processing_slots: default_slots(),
        }
    }
}

fn default_slots() -> u32 {
    1
}

/// One known worker. Every poll or protocol call refreshes `last_seen_at`;
/// the registry derives liveness from that timestamp alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    pub capabilities: ClientCapabilities,
    pub registered_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

impl ClientRecord {
    pub fn new(client_id: String, capabilities: ClientCapabilities, now: Timestamp) -> Self {
        Self {
            client_id,
            capabilities,
            registered_at: now,
            last_seen_at: now,
            tasks_claimed: 0,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_seen_at = now;
    }

    /// A client is stale once it has been silent for longer than the
    /// liveness window. Stale clients drop out of active counts and their
    /// in-flight claims become eligible for early reassignment.
    pub fn is_stale(&self, now: Timestamp, liveness: std::time::Duration) -> bool {
        now.signed_duration_since(self.last_seen_at)
            .to_std()
            .map(|silent| silent > liveness)
            .unwrap_or(false)
    }
}
