use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shutterq_core::client::ClientCapabilities;
use shutterq_core::estimation::TimeoutPolicy;
use shutterq_core::types::validate_client_id;

use crate::backoff::BackoffConfig;

/// Agent configuration loaded from environment variables.
///
/// `SERVERS` and `CLIENT_ID` are required; everything else has defaults
/// suitable for a single workstation on a LAN.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URLs of every task server to poll, in priority order.
    pub servers: Vec<String>,
    /// Stable identity this worker registers under on every server.
    pub client_id: String,
    /// Base URL of the local edit bridge that applies presets.
    pub bridge_url: String,
    /// Scratch directory for downloaded inputs and produced results.
    pub workspace_dir: PathBuf,
    /// Hostname reported in the registration capabilities.
    pub hostname: Option<String>,
    /// Concurrent task ceiling; also reported at registration.
    pub processing_slots: u32,

    /// Poll cadence while any server recently had work, in milliseconds.
    pub poll_interval_ms: u64,
    /// Poll cadence once every server has been empty for a while.
    pub idle_poll_interval_ms: u64,
    /// Consecutive empty polls before a server counts as idle.
    pub empty_poll_threshold: u32,

    /// First retry delay after a failed server call, in milliseconds.
    pub base_retry_delay_ms: u64,
    /// Ceiling on the retry delay, in seconds.
    pub max_retry_delay_secs: u64,
    /// Multiplier applied to the retry delay after each failure.
    pub backoff_factor: f64,
    /// Consecutive failures before a server is suspended.
    pub failure_threshold: u32,
    /// How long a suspended server sits out before health probes may
    /// revive it.
    pub cooldown_secs: u64,
    /// Interval between health probes of suspended servers.
    pub health_check_interval_secs: u64,

    /// Timeout applied to protocol and transfer HTTP calls.
    pub http_timeout_secs: u64,
    /// How long shutdown waits for in-flight tasks to finish.
    pub shutdown_timeout_secs: u64,

    /// Safety margin added on top of the estimated processing time.
    pub processing_buffer_secs: u64,
    /// Floor of the estimated processing time for any preset.
    pub base_processing_timeout_secs: u64,
    /// Seconds added per mask layer found in the preset.
    pub mask_step_secs: u64,
    /// Seconds added per distinct slow operation found in the preset.
    pub complex_step_secs: u64,
    /// Ceiling on the masked-tier estimate.
    pub max_mask_timeout_secs: u64,
    /// Ceiling on the complex-tier estimate.
    pub max_complex_timeout_secs: u64,
    /// Estimate used when the preset body cannot be read.
    pub unreadable_timeout_secs: u64,

    /// Total budget for waiting on a not-yet-published input artifact.
    pub file_wait_timeout_secs: u64,
    /// First delay of the file-wait backoff, in milliseconds.
    pub file_wait_base_delay_ms: u64,
    /// Multiplier applied to the file-wait delay after each miss.
    pub file_wait_backoff_factor: f64,
    /// Ceiling on a single file-wait delay, in seconds.
    pub file_wait_max_delay_secs: u64,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                      | Required | Default                 |
    /// |------------------------------|----------|-------------------------|
    /// | `SERVERS`                    | yes      | --                      |
    /// | `CLIENT_ID`                  | yes      | --                      |
    /// | `BRIDGE_URL`                 | no       | `http://127.0.0.1:9090` |
    /// | `WORKSPACE_DIR`              | no       | `workspace`             |
    /// | `AGENT_HOSTNAME`             | no       | `$HOSTNAME` if set      |
    /// | `PROCESSING_SLOTS`           | no       | `1`                     |
    /// | `POLL_INTERVAL_MS`           | no       | `2000`                  |
    /// | `IDLE_POLL_INTERVAL_MS`      | no       | `10000`                 |
    /// | `EMPTY_POLL_THRESHOLD`       | no       | `50`                    |
    /// | `BASE_RETRY_DELAY_MS`        | no       | `2000`                  |
    /// | `MAX_RETRY_DELAY_SECS`       | no       | `30`                    |
    /// | `BACKOFF_FACTOR`             | no       | `1.5`                   |
    /// | `FAILURE_THRESHOLD`          | no       | `5`                     |
    /// | `COOLDOWN_SECS`              | no       | `60`                    |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | no       | `30`                    |
    /// | `HTTP_TIMEOUT_SECS`          | no       | `60`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | no       | `30`                    |
    /// | `PROCESSING_BUFFER_SECS`     | no       | `10`                    |
    /// | `BASE_PROCESSING_TIMEOUT_SECS` | no     | `5`                     |
    /// | `MASK_STEP_SECS`             | no       | `2`                     |
    /// | `COMPLEX_STEP_SECS`          | no       | `3`                     |
    /// | `MAX_MASK_TIMEOUT_SECS`      | no       | `120`                   |
    /// | `MAX_COMPLEX_TIMEOUT_SECS`   | no       | `60`                    |
    /// | `UNREADABLE_TIMEOUT_SECS`    | no       | `30`                    |
    /// | `FILE_WAIT_TIMEOUT_SECS`     | no       | `180`                   |
    /// | `FILE_WAIT_BASE_DELAY_MS`    | no       | `2000`                  |
    /// | `FILE_WAIT_BACKOFF_FACTOR`   | no       | `1.5`                   |
    /// | `FILE_WAIT_MAX_DELAY_SECS`   | no       | `30`                    |
    ///
    /// Returns an error message naming the first missing or invalid
    /// required variable so `main` can log it and exit.
    pub fn from_env() -> Result<Self, String> {
        let servers = env_list("SERVERS");
        if servers.is_empty() {
            return Err("SERVERS must list at least one server base URL".to_string());
        }
        for url in &servers {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("SERVERS entry '{url}' is not an http(s) URL"));
            }
        }

        let client_id =
            std::env::var("CLIENT_ID").map_err(|_| "CLIENT_ID is required".to_string())?;
        validate_client_id(&client_id).map_err(|e| e.to_string())?;

        Ok(Self {
            servers,
            client_id,
            bridge_url: env_string("BRIDGE_URL", "http://127.0.0.1:9090"),
            workspace_dir: PathBuf::from(env_string("WORKSPACE_DIR", "workspace")),
            hostname: std::env::var("AGENT_HOSTNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .ok(),
            processing_slots: env_parse("PROCESSING_SLOTS", 1),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 2000),
            idle_poll_interval_ms: env_parse("IDLE_POLL_INTERVAL_MS", 10_000),
            empty_poll_threshold: env_parse("EMPTY_POLL_THRESHOLD", 50),
            base_retry_delay_ms: env_parse("BASE_RETRY_DELAY_MS", 2000),
            max_retry_delay_secs: env_parse("MAX_RETRY_DELAY_SECS", 30),
            backoff_factor: env_parse("BACKOFF_FACTOR", 1.5),
            failure_threshold: env_parse("FAILURE_THRESHOLD", 5),
            cooldown_secs: env_parse("COOLDOWN_SECS", 60),
            health_check_interval_secs: env_parse("HEALTH_CHECK_INTERVAL_SECS", 30),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 60),
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", 30),
            processing_buffer_secs: env_parse("PROCESSING_BUFFER_SECS", 10),
            base_processing_timeout_secs: env_parse("BASE_PROCESSING_TIMEOUT_SECS", 5),
            mask_step_secs: env_parse("MASK_STEP_SECS", 2),
            complex_step_secs: env_parse("COMPLEX_STEP_SECS", 3),
            max_mask_timeout_secs: env_parse("MAX_MASK_TIMEOUT_SECS", 120),
            max_complex_timeout_secs: env_parse("MAX_COMPLEX_TIMEOUT_SECS", 60),
            unreadable_timeout_secs: env_parse("UNREADABLE_TIMEOUT_SECS", 30),
            file_wait_timeout_secs: env_parse("FILE_WAIT_TIMEOUT_SECS", 180),
            file_wait_base_delay_ms: env_parse("FILE_WAIT_BASE_DELAY_MS", 2000),
            file_wait_backoff_factor: env_parse("FILE_WAIT_BACKOFF_FACTOR", 1.5),
            file_wait_max_delay_secs: env_parse("FILE_WAIT_MAX_DELAY_SECS", 30),
        })
    }

    /// Capabilities advertised at registration.
    pub fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            hostname: self.hostname.clone(),
            agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            processing_slots: self.processing_slots,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Backoff applied to a server after failed calls.
    pub fn retry_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
            multiplier: self.backoff_factor,
        }
    }

    /// Backoff applied while waiting for a not-yet-published file.
    pub fn file_wait_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.file_wait_base_delay_ms),
            max_delay: Duration::from_secs(self.file_wait_max_delay_secs),
            multiplier: self.file_wait_backoff_factor,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn processing_buffer(&self) -> Duration {
        Duration::from_secs(self.processing_buffer_secs)
    }

    /// Deadline estimation policy applied to claimed presets.
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            base: Duration::from_secs(self.base_processing_timeout_secs),
            per_mask_layer: Duration::from_secs(self.mask_step_secs),
            per_complex_op: Duration::from_secs(self.complex_step_secs),
            max_masked: Duration::from_secs(self.max_mask_timeout_secs),
            max_complex: Duration::from_secs(self.max_complex_timeout_secs),
            unreadable_default: Duration::from_secs(self.unreadable_timeout_secs),
        }
    }

    pub fn file_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.file_wait_timeout_secs)
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
