//! Error types for the Redis-backed queue and safety-layer stores.

/// Errors surfaced by the priority queue (streams, delayed set, DLQ).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue store unreachable: {0}")]
    StoreUnavailable(String),

    #[error("malformed queue entry: {0}")]
    Malformed(String),
}
