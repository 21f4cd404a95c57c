//! Server configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `ORC_*` environment variables,
//! following the same `from_env` shape as the rest of this workspace's
//! sibling server crates.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend selector.
    pub storage_backend: StorageBackendType,
    /// Redis connection string backing the queue and safety-layer stores.
    pub redis_url: String,
    /// Number of dispatch-loop workers.
    pub worker_count: usize,
    /// Default job timeout when a caller does not specify one.
    pub default_job_timeout_seconds: u64,
    /// Root directory artifacts are written under.
    pub artifacts_root: String,
    /// Log level filter (e.g. `info`, `debug`, `warn`).
    pub log_level: String,
    /// Required `X-API-Key` header value. `None` disables key enforcement.
    pub api_key: Option<String>,
    /// Interval the delayed-queue promoter task runs at.
    pub delayed_scan_interval_secs: u64,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `PostgreSQL` persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (Railway convention, binds to `0.0.0.0`)
    /// - `ORC_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8080`)
    /// - `ORC_STORAGE` — `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL` — `PostgreSQL` connection string (required when `ORC_STORAGE=postgres`)
    /// - `ORC_REDIS_URL` — Redis connection string (default: `redis://127.0.0.1:6379`)
    /// - `ORC_WORKER_COUNT` — dispatch-loop worker count (default: `4`)
    /// - `ORC_DEFAULT_JOB_TIMEOUT_SECONDS` — default per-job timeout (default: `300`)
    /// - `ORC_ARTIFACTS_ROOT` — artifact storage root directory (default: `./artifacts`)
    /// - `ORC_LOG_LEVEL` — log filter (default: `info`)
    /// - `ORC_API_KEY` — required `X-API-Key` value; unset disables enforcement
    /// - `ORC_DELAYED_SCAN_INTERVAL` — seconds between delayed-queue promotions (default: `5`)
    #[must_use]
    pub fn from_env() -> Self {
        // Priority: ORC_BIND_ADDR > PORT (Railway) > default 127.0.0.1:8080
        let bind_addr = if let Ok(addr) = std::env::var("ORC_BIND_ADDR") {
            addr.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8080);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8080))
        };

        let storage_backend = match std::env::var("ORC_STORAGE").unwrap_or_else(|_| "memory".to_owned()).to_lowercase().as_str() {
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/orc".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let redis_url = std::env::var("ORC_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());

        let worker_count = std::env::var("ORC_WORKER_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(4);

        let default_job_timeout_seconds =
            std::env::var("ORC_DEFAULT_JOB_TIMEOUT_SECONDS").ok().and_then(|v| v.parse().ok()).unwrap_or(300);

        let artifacts_root = std::env::var("ORC_ARTIFACTS_ROOT").unwrap_or_else(|_| "./artifacts".to_owned());

        let log_level = std::env::var("ORC_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let api_key = std::env::var("ORC_API_KEY").ok().filter(|v| !v.is_empty());

        let delayed_scan_interval_secs = std::env::var("ORC_DELAYED_SCAN_INTERVAL").ok().and_then(|v| v.parse().ok()).unwrap_or(5);

        Self {
            bind_addr,
            storage_backend,
            redis_url,
            worker_count,
            default_job_timeout_seconds,
            artifacts_root,
            log_level,
            api_key,
            delayed_scan_interval_secs,
        }
    }
}
