//! Redis-backed circuit breaker state store (C3, §4.3).
//!
//! A plain `GET`/`SETEX` pair, matching the prototype's own
//! `_get_circuit_state`/`_set_circuit_state`. The breaker's correctness does
//! not depend on this being atomic across racing callers — at most one extra
//! probe or failure-count undercount can happen during a race, which the
//! safety layer tolerates (it governs outbound load, not a financial ledger).

use std::time::Duration;

use async_trait::async_trait;
use orc_core::circuit_breaker::{CircuitBreakerStore, CircuitSnapshot};
use orc_core::error::CircuitBreakerError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Redis-backed implementation of [`CircuitBreakerStore`].
#[derive(Clone)]
pub struct RedisCircuitBreakerStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCircuitBreakerStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self { conn, key_prefix: key_prefix.into() }
    }

    fn key(&self, domain: &str) -> String {
        format!("{}:{domain}", self.key_prefix)
    }
}

#[async_trait]
impl CircuitBreakerStore for RedisCircuitBreakerStore {
    async fn load(&self, domain: &str) -> Result<CircuitSnapshot, CircuitBreakerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> =
            conn.get(self.key(domain)).await.map_err(|e| CircuitBreakerError::StoreUnavailable(e.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json).map_err(|e| CircuitBreakerError::StoreUnavailable(e.to_string())),
            None => Ok(CircuitSnapshot::default()),
        }
    }

    async fn store(&self, domain: &str, snapshot: &CircuitSnapshot, ttl: Duration) -> Result<(), CircuitBreakerError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(snapshot).map_err(|e| CircuitBreakerError::StoreUnavailable(e.to_string()))?;
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.key(domain), json, ttl_secs)
            .await
            .map_err(|e| CircuitBreakerError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
