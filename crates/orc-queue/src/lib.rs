//! Redis-backed implementations of the orchestrator's safety-layer storage
//! seams (rate limiter, circuit breaker, idempotency engine) plus the
//! priority job queue (streams, delayed set, dead-letter list).
//!
//! Everything here is a thin, fallible adapter over `redis` — the actual
//! decision logic (refill math, FSM transitions, admission outcomes) lives
//! in `orc-core` and is unit tested there without a Redis instance.

mod circuit_breaker;
mod error;
mod idempotency;
mod keystore;
mod queue;
mod rate_limit;

pub use circuit_breaker::RedisCircuitBreakerStore;
pub use error::QueueError;
pub use idempotency::RedisIdempotencyStore;
pub use keystore::RedisKeystoreStore;
pub use queue::{DequeuedJob, PriorityQueue};
pub use rate_limit::{acquire_dual_window, RedisRateLimiter};

use redis::aio::ConnectionManager;

/// Connect to Redis and build a [`ConnectionManager`] shared by every store
/// in this crate — cheap to clone, reconnects transparently.
///
/// # Errors
///
/// Returns a [`redis::RedisError`] if the URL is invalid or the initial
/// connection fails.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(redis_url)?;
    ConnectionManager::new(client).await
}
