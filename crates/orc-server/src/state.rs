//! Shared application state.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers and the dispatch-loop workers via `Arc`.

use std::collections::HashSet;
use std::sync::Arc;

use orc_browser::{ArtifactCapturer, BrowserPool, CookieCache};
use orc_core::CircuitBreaker;
use orc_core::CredentialVault;
use orc_queue::{PriorityQueue, RedisCircuitBreakerStore, RedisIdempotencyStore, RedisRateLimiter};
use orc_storage::StorageBackend;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ServerConfig;

/// Shared application state passed to all HTTP handlers and dispatch workers.
pub struct AppState {
    /// Durable storage for jobs, domain policies, and the audit log.
    pub storage: Arc<dyn StorageBackend>,
    /// Redis-backed priority queue (streams, delayed set, DLQ).
    pub queue: PriorityQueue,
    /// Shared Redis connection, cloned per call into a keyed [`RedisRateLimiter`].
    ///
    /// The limiter is keyed per caller (domain, API key, or IP), so the
    /// connection is held bare here rather than behind one fixed instance.
    pub redis_conn: ConnectionManager,
    /// Per-domain circuit breaker state store.
    pub circuit_store: RedisCircuitBreakerStore,
    /// Idempotency key reservation store.
    pub idempotency_store: RedisIdempotencyStore,
    /// Pure circuit breaker decision logic, shared across domains.
    pub circuit_breaker: CircuitBreaker,
    /// Credential resolution for job payloads that need auth secrets.
    pub vault: Arc<CredentialVault>,
    /// Bounded headless-browser pool.
    pub pool: BrowserPool,
    /// Authenticated-session cookie cache shared across the executor.
    pub cookies: Arc<CookieCache>,
    /// Artifact writer shared across the executor.
    pub artifacts: ArtifactCapturer,
    /// HTTP client used for workflow webhook delivery.
    pub http_client: reqwest::Client,
    /// Job ids an operator has asked to cancel while running. Consulted by
    /// the dispatch loop once the in-flight `execute` call returns.
    pub cancellations: Arc<Mutex<HashSet<Uuid>>>,
    /// The configuration this state was built from.
    pub config: ServerConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Domain-scoped admission rate limiter (§4.10 policy check).
    #[must_use]
    pub fn domain_rate_limiter(&self, domain: &str) -> RedisRateLimiter {
        RedisRateLimiter::new(self.redis_conn.clone(), format!("ratelimit:domain:{domain}"))
    }

    /// Caller-scoped rate limiter for the HTTP middleware layer, keyed by
    /// API key when present, otherwise by remote IP.
    #[must_use]
    pub fn caller_rate_limiter(&self, caller_id: &str) -> RedisRateLimiter {
        RedisRateLimiter::new(self.redis_conn.clone(), format!("ratelimit:caller:{caller_id}"))
    }
}
