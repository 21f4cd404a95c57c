//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open the storage backend at the given path/connection string.
    #[error("failed to open storage at '{target}': {reason}")]
    Open { target: String, reason: String },

    /// Failed to read a job, policy, or audit row.
    #[error("failed to read {what}: {reason}")]
    Read { what: String, reason: String },

    /// Failed to write a job, policy, or audit row.
    #[error("failed to write {what}: {reason}")]
    Write { what: String, reason: String },

    /// A job update's compare-and-swap precondition did not hold — the
    /// caller's view of `status` was stale.
    #[error("job {job_id} was not in the expected status for this transition")]
    StaleTransition { job_id: uuid::Uuid },
}
