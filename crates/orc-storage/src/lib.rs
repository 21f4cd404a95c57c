//! Durable storage abstraction for the orchestrator (C9 State Manager, §3).
//!
//! [`StorageBackend`] is the seam between the in-process orchestrator and
//! durable storage for jobs, domain policies, and the append-only audit log.
//! Two implementations are provided: [`MemoryBackend`] for tests, and
//! [`PostgresBackend`] (behind the `postgres-backend` feature, default on)
//! for production.

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;

use orc_core::{AuditLogEntry, DomainPolicy, Job};
use uuid::Uuid;

/// Durable storage for jobs, domain policies, and the audit log.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Persist a newly admitted job.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Fetch a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError>;

    /// Persist a job whose status has advanced, guarded by the caller
    /// already holding an in-memory compare-and-swap on `expected_status`
    /// (the state manager enforces the forward-only transition; this call
    /// simply makes the new state durable).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn update_job(&self, job: &Job) -> Result<(), StorageError>;

    /// The `limit` most recently created jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError>;

    /// Count non-terminal jobs for `domain` — backs the concurrency ceiling
    /// check in admission (§4.4 step 5) and the universal invariant in §8
    /// that `concurrency[domain]` always equals this count at quiescence.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn count_active_jobs(&self, domain: &str) -> Result<u32, StorageError>;

    /// Success rate (0.0-1.0) over the most recent `sample` terminal jobs,
    /// for the operator status endpoint (§4.13).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn recent_success_rate(&self, sample: usize) -> Result<f64, StorageError>;

    /// Fetch the policy on file for a domain, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get_policy(&self, domain: &str) -> Result<Option<DomainPolicy>, StorageError>;

    /// Insert or replace the policy for a domain.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put_policy(&self, policy: &DomainPolicy) -> Result<(), StorageError>;

    /// Append one row to the audit log. Audit write failures are logged by
    /// the caller but never block admission (§7) — callers should not
    /// propagate this error into the admission response.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StorageError>;

    /// Whether the backend is currently reachable, for the operator status
    /// endpoint's health booleans.
    async fn health_check(&self) -> bool;
}
