//! Priority job queue (C9/C10 plumbing, §4.9-§4.10).
//!
//! Four Redis Streams (`queue:0`..`queue:3`, one per [`Priority`]) hold
//! enqueued job ids behind one consumer group each. A sorted set
//! (`queue:delayed`) holds jobs scheduled for a future retry, scored by their
//! ready timestamp. A list (`queue:dlq`) holds jobs whose retry budget is
//! exhausted. The dispatch loop scans priorities in [`Priority::ORDER`] and
//! never reorders within a stream — consumer-group reads are FIFO per stream.

use orc_core::job::Priority;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::QueueError;

const CONSUMER_GROUP: &str = "orc-workers";
const DELAYED_KEY: &str = "queue:delayed";
const DLQ_KEY: &str = "queue:dlq";

/// One job id read off a priority stream, carrying the entry id the
/// consumer group needs to `XACK`.
#[derive(Debug, Clone)]
pub struct DequeuedJob {
    pub job_id: Uuid,
    pub stream_entry_id: String,
}

/// Redis-backed priority queue.
#[derive(Clone)]
pub struct PriorityQueue {
    conn: ConnectionManager,
    consumer_name: String,
}

impl PriorityQueue {
    #[must_use]
    pub fn new(conn: ConnectionManager, consumer_name: impl Into<String>) -> Self {
        Self { conn, consumer_name: consumer_name.into() }
    }

    /// Ensure the consumer group exists on a priority's stream, creating the
    /// stream itself if necessary. Idempotent — `BUSYGROUP` is swallowed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] for any error other than the
    /// group already existing.
    pub async fn ensure_group(&self, priority: Priority) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(priority.stream_key(), CONSUMER_GROUP, "0").await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::StoreUnavailable(e.to_string())),
        }
    }

    /// Enqueue a job id onto its priority's stream.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn enqueue(&self, priority: Priority, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(priority.stream_key(), "*", &[("job_id", job_id.to_string())])
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Read up to `count` pending job ids from `priority`'s stream for this
    /// consumer, blocking up to `block_ms` milliseconds if none are ready.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable, or
    /// [`QueueError::Malformed`] if an entry is missing its `job_id` field.
    pub async fn dequeue(&self, priority: Priority, count: usize, block_ms: usize) -> Result<Vec<DequeuedJob>, QueueError> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(CONSUMER_GROUP, &self.consumer_name)
            .count(count)
            .block(block_ms);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[priority.stream_key()], &[">"], &opts)
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;

        let mut jobs = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let job_id_raw: String = entry
                    .map
                    .get("job_id")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .ok_or_else(|| QueueError::Malformed(format!("stream entry {} missing job_id", entry.id)))?;
                let job_id = Uuid::parse_str(&job_id_raw).map_err(|e| QueueError::Malformed(e.to_string()))?;
                jobs.push(DequeuedJob { job_id, stream_entry_id: entry.id });
            }
        }
        Ok(jobs)
    }

    /// Acknowledge successful processing of a dequeued entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn ack(&self, priority: Priority, entry_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(priority.stream_key(), CONSUMER_GROUP, &[entry_id])
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Schedule a job for re-dispatch at `ready_at_unix_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn schedule_delayed(&self, job_id: Uuid, priority: Priority, ready_at_unix_seconds: f64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let member = format!("{job_id}:{}", priority as u8);
        let _: i64 = conn
            .zadd(DELAYED_KEY, member, ready_at_unix_seconds)
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Move every delayed job whose ready time has passed back onto its
    /// priority stream. Called periodically by the delayed-queue promoter
    /// task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable, or
    /// [`QueueError::Malformed`] if a delayed entry does not round-trip.
    pub async fn promote_ready_delayed(&self, now_unix_seconds: f64) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let ready: Vec<String> = conn
            .zrangebyscore(DELAYED_KEY, 0, now_unix_seconds)
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;

        let mut promoted = 0;
        for member in &ready {
            let (job_id_str, priority_str) =
                member.split_once(':').ok_or_else(|| QueueError::Malformed(format!("delayed entry {member} malformed")))?;
            let job_id = Uuid::parse_str(job_id_str).map_err(|e| QueueError::Malformed(e.to_string()))?;
            let priority_val: u8 = priority_str.parse().map_err(|e: std::num::ParseIntError| QueueError::Malformed(e.to_string()))?;
            let priority = Priority::from_u8(priority_val).ok_or_else(|| QueueError::Malformed(format!("bad priority {priority_val}")))?;

            self.enqueue(priority, job_id).await?;
            let _: i64 = conn.zrem(DELAYED_KEY, member).await.map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Push a job whose retry budget is exhausted onto the dead-letter list.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn push_dlq(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(DLQ_KEY, job_id.to_string()).await.map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Current length of `priority`'s stream, for the queue stats endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn stream_depth(&self, priority: Priority) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.xlen(priority.stream_key()).await.map_err(|e| QueueError::StoreUnavailable(e.to_string()))
    }

    /// Number of jobs waiting in the delayed set.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn delayed_count(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.zcard(DELAYED_KEY).await.map_err(|e| QueueError::StoreUnavailable(e.to_string()))
    }

    /// Number of jobs on the dead-letter list.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn dlq_len(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.llen(DLQ_KEY).await.map_err(|e| QueueError::StoreUnavailable(e.to_string()))
    }
}
