//! Redis-backed idempotency key store (C5, §4.5).

use std::time::Duration;

use async_trait::async_trait;
use orc_core::error::IdempotencyError;
use orc_core::idempotency::IdempotencyStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

/// Redis-backed implementation of [`IdempotencyStore`] using `SET NX EX` for
/// an atomic reserve-if-absent.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisIdempotencyStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self { conn, key_prefix: key_prefix.into() }
    }

    fn key(&self, idempotency_key: &str) -> String {
        format!("{}:{idempotency_key}", self.key_prefix)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn reserve(&self, key: &str, job_id: Uuid, ttl: Duration) -> Result<Uuid, IdempotencyError> {
        let mut conn = self.conn.clone();
        let redis_key = self.key(key);
        let job_id_str = job_id.to_string();

        let reserved: bool = redis::cmd("SET")
            .arg(&redis_key)
            .arg(&job_id_str)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map(|v| v.is_some())
            .map_err(|e| IdempotencyError::StoreUnavailable(e.to_string()))?;

        if reserved {
            return Ok(job_id);
        }

        let owner: String =
            conn.get(&redis_key).await.map_err(|e| IdempotencyError::StoreUnavailable(e.to_string()))?;
        Uuid::parse_str(&owner).map_err(|e| IdempotencyError::StoreUnavailable(e.to_string()))
    }
}
