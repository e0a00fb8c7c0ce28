use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shutterq_core::files::FileLimits;
use shutterq_store::FileWaitConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,

    /// Directory holding uploaded inputs and result artifacts.
    pub exchange_dir: PathBuf,
    /// Ceiling on unfinished tasks held by the store.
    pub task_capacity: usize,
    /// Claim attempts per task before a failure becomes terminal.
    pub max_attempts: u32,
    /// How long a claimed task may sit unconfirmed in reading.
    pub reading_timeout_secs: u64,
    /// How long a confirmed task may process before it is reclaimed.
    pub processing_timeout_secs: u64,
    /// Interval between sweep passes.
    pub sweep_interval_secs: u64,
    /// How long terminal tasks (and their files) are kept around.
    pub terminal_retention_secs: u64,
    /// Window after which a silent client stops counting as active and its
    /// claims become reclaimable.
    pub client_liveness_secs: u64,
    /// Window after which a silent client is dropped from the registry.
    pub client_prune_secs: u64,

    /// Per-file upload ceiling in bytes.
    pub max_file_bytes: u64,
    /// Whole-request body ceiling in bytes; bounds a multipart submission
    /// (photo + preset + framing).
    pub max_request_bytes: u64,
    /// Allowed photo/result extensions (lowercase, no dot).
    pub photo_extensions: Vec<String>,
    /// Allowed preset extensions (lowercase, no dot).
    pub preset_extensions: Vec<String>,

    /// How long a download request may poll for a referenced artifact that
    /// has not been published yet. Keep below `request_timeout_secs` so the
    /// caller gets a clean FileNotReady instead of a request timeout.
    pub file_wait_timeout_secs: u64,
    /// First delay of the file-wait backoff, in milliseconds.
    pub file_wait_base_delay_ms: u64,
    /// Multiplier applied to the file-wait delay after each miss.
    pub file_wait_backoff_factor: f64,
    /// Ceiling on a single file-wait delay, in seconds.
    pub file_wait_max_delay_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `HOST`                     | `0.0.0.0`               |
    /// | `PORT`                     | `8080`                  |
    /// | `CORS_ORIGINS`             | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`                    |
    /// | `EXCHANGE_DIR`             | `exchange`              |
    /// | `TASK_CAPACITY`            | `1000`                  |
    /// | `MAX_ATTEMPTS`             | `3`                     |
    /// | `READING_TIMEOUT_SECS`     | `10`                    |
    /// | `PROCESSING_TIMEOUT_SECS`  | `1800`                  |
    /// | `SWEEP_INTERVAL_SECS`      | `30`                    |
    /// | `TERMINAL_RETENTION_SECS`  | `86400`                 |
    /// | `CLIENT_LIVENESS_SECS`     | `60`                    |
    /// | `CLIENT_PRUNE_SECS`        | `600`                   |
    /// | `MAX_FILE_BYTES`           | `67108864` (64 MiB)     |
    /// | `MAX_REQUEST_BYTES`        | `MAX_FILE_BYTES` + 64 KiB |
    /// | `PHOTO_EXTENSIONS`         | `jpg,jpeg,png,tif,tiff,dng` |
    /// | `PRESET_EXTENSIONS`        | `xmp,lua,json`          |
    /// | `FILE_WAIT_TIMEOUT_SECS`   | `20`                    |
    /// | `FILE_WAIT_BASE_DELAY_MS`  | `2000`                  |
    /// | `FILE_WAIT_BACKOFF_FACTOR` | `1.5`                   |
    /// | `FILE_WAIT_MAX_DELAY_SECS` | `30`                    |
    pub fn from_env() -> Self {
        let max_file_bytes = env_parse("MAX_FILE_BYTES", 64 * 1024 * 1024);
        Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            cors_origins: env_list("CORS_ORIGINS", "http://localhost:5173"),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", 30),
            exchange_dir: PathBuf::from(env_string("EXCHANGE_DIR", "exchange")),
            task_capacity: env_parse("TASK_CAPACITY", 1000),
            max_attempts: env_parse("MAX_ATTEMPTS", 3),
            reading_timeout_secs: env_parse("READING_TIMEOUT_SECS", 10),
            processing_timeout_secs: env_parse("PROCESSING_TIMEOUT_SECS", 1800),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 30),
            terminal_retention_secs: env_parse("TERMINAL_RETENTION_SECS", 86_400),
            client_liveness_secs: env_parse("CLIENT_LIVENESS_SECS", 60),
            client_prune_secs: env_parse("CLIENT_PRUNE_SECS", 600),
            max_file_bytes,
            max_request_bytes: env_parse("MAX_REQUEST_BYTES", max_file_bytes + 64 * 1024),
            photo_extensions: env_list("PHOTO_EXTENSIONS", "jpg,jpeg,png,tif,tiff,dng"),
            preset_extensions: env_list("PRESET_EXTENSIONS", "xmp,lua,json"),
            file_wait_timeout_secs: env_parse("FILE_WAIT_TIMEOUT_SECS", 20),
            file_wait_base_delay_ms: env_parse("FILE_WAIT_BASE_DELAY_MS", 2000),
            file_wait_backoff_factor: env_parse("FILE_WAIT_BACKOFF_FACTOR", 1.5),
            file_wait_max_delay_secs: env_parse("FILE_WAIT_MAX_DELAY_SECS", 30),
        }
    }

    pub fn file_limits(&self) -> FileLimits {
        FileLimits {
            max_file_bytes: self.max_file_bytes,
            photo_extensions: self.photo_extensions.clone(),
            preset_extensions: self.preset_extensions.clone(),
        }
    }

    pub fn file_wait(&self) -> FileWaitConfig {
        FileWaitConfig {
            timeout: Duration::from_secs(self.file_wait_timeout_secs),
            base_delay: Duration::from_millis(self.file_wait_base_delay_ms),
            backoff_factor: self.file_wait_backoff_factor,
            max_delay: Duration::from_secs(self.file_wait_max_delay_secs),
        }
    }

    pub fn reading_timeout(&self) -> Duration {
        Duration::from_secs(self.reading_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }

    pub fn client_liveness(&self) -> Duration {
        Duration::from_secs(self.client_liveness_secs)
    }

    pub fn client_prune_after(&self) -> Duration {
        Duration::from_secs(self.client_prune_secs)
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

fn env_list(name: &str, default: &str) -> Vec<String> {
    env_string(name, default)
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
