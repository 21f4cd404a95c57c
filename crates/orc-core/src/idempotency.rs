//! Idempotency engine (C5, §4.5).
//!
//! Maps a caller-supplied idempotency key to the job id it first produced,
//! for an operator-configured TTL, giving at-most-once admission semantics:
//! replays of a request return the original job instead of creating a new one.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::IdempotencyError;

/// Default time an idempotency key is remembered for.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Storage seam for idempotency keys.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserve `key` for `job_id` if it is not already taken.
    /// Returns the job id that now owns the key — either `job_id` itself
    /// (the reservation succeeded) or the job id from a prior reservation
    /// (a replay).
    async fn reserve(&self, key: &str, job_id: Uuid, ttl: Duration) -> Result<Uuid, IdempotencyError>;
}

/// Outcome of admitting a job under an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// This is the first time the key has been seen; `job_id` is fresh.
    Created,
    /// The key was already reserved; the caller should return the existing job.
    Replayed,
}

/// Admit `job_id` under `idempotency_key`, returning whether it was newly
/// created or is a replay of an earlier admission.
///
/// # Errors
///
/// Propagates [`IdempotencyError`] from the store.
pub async fn admit(
    store: &dyn IdempotencyStore,
    idempotency_key: &str,
    job_id: Uuid,
) -> Result<(Uuid, AdmissionOutcome), IdempotencyError> {
    let owner = store.reserve(idempotency_key, job_id, DEFAULT_IDEMPOTENCY_TTL).await?;
    let outcome = if owner == job_id { AdmissionOutcome::Created } else { AdmissionOutcome::Replayed };
    Ok((owner, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeStore {
        keys: Mutex<HashMap<String, Uuid>>,
    }

    #[async_trait]
    impl IdempotencyStore for FakeStore {
        async fn reserve(&self, key: &str, job_id: Uuid, _ttl: Duration) -> Result<Uuid, IdempotencyError> {
            let mut keys = self.keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(*keys.entry(key.to_owned()).or_insert(job_id))
        }
    }

    #[tokio::test]
    async fn first_admission_is_created() {
        let store = FakeStore { keys: Mutex::new(HashMap::new()) };
        let job_id = Uuid::new_v4();
        let (owner, outcome) = admit(&store, "key-1", job_id).await.expect("admit");
        assert_eq!(owner, job_id);
        assert_eq!(outcome, AdmissionOutcome::Created);
    }

    #[tokio::test]
    async fn replay_returns_original_job() {
        let store = FakeStore { keys: Mutex::new(HashMap::new()) };
        let first_job = Uuid::new_v4();
        let second_job = Uuid::new_v4();
        admit(&store, "key-1", first_job).await.expect("admit");
        let (owner, outcome) = admit(&store, "key-1", second_job).await.expect("admit");
        assert_eq!(owner, first_job);
        assert_eq!(outcome, AdmissionOutcome::Replayed);
    }
}
