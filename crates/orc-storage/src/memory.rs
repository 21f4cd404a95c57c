//! In-memory storage backend for tests.
//!
//! Not persistent — all data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Arc;

use orc_core::{AuditLogEntry, DomainPolicy, Job, JobStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{StorageBackend, StorageError};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    job_order: Vec<Uuid>,
    policies: HashMap<String, DomainPolicy>,
    audit_log: Vec<AuditLogEntry>,
}

/// An in-memory storage backend backed by a `HashMap` behind a `RwLock`.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.job_order.push(job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        let state = self.state.read().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let state = self.state.read().await;
        Ok(state.job_order.iter().rev().take(limit).filter_map(|id| state.jobs.get(id).cloned()).collect())
    }

    async fn count_active_jobs(&self, domain: &str) -> Result<u32, StorageError> {
        let state = self.state.read().await;
        let count = state.jobs.values().filter(|j| j.domain == domain && !j.status.is_terminal()).count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn recent_success_rate(&self, sample: usize) -> Result<f64, StorageError> {
        let state = self.state.read().await;
        let terminal: Vec<&Job> = state
            .job_order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|j| j.status.is_terminal())
            .take(sample)
            .collect();
        if terminal.is_empty() {
            return Ok(1.0);
        }
        let successes = terminal.iter().filter(|j| j.status == JobStatus::Completed).count();
        #[allow(clippy::cast_precision_loss)]
        Ok(successes as f64 / terminal.len() as f64)
    }

    async fn get_policy(&self, domain: &str) -> Result<Option<DomainPolicy>, StorageError> {
        let state = self.state.read().await;
        Ok(state.policies.get(domain).cloned())
    }

    async fn put_policy(&self, policy: &DomainPolicy) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.policies.insert(policy.domain.clone(), policy.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.audit_log.push(entry.clone());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::{AuthorizationMode, JobType, NewJob, Priority, Strategy};

    fn sample_job(domain: &str) -> Job {
        Job::new(NewJob {
            domain: domain.to_owned(),
            url: format!("https://{domain}"),
            job_type: JobType::NavigateExtract,
            strategy: Strategy::Vanilla,
            priority: Priority::Normal,
            payload: serde_json::json!({}),
            idempotency_key: None,
            timeout_seconds: Job::DEFAULT_TIMEOUT_SECONDS,
            authorization_mode: AuthorizationMode::Public,
        })
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let backend = MemoryBackend::new();
        let job = sample_job("example.com");
        backend.insert_job(&job).await.expect("insert");
        let fetched = backend.get_job(job.id).await.expect("get").expect("present");
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn count_active_jobs_excludes_terminal() {
        let backend = MemoryBackend::new();
        let mut job = sample_job("example.com");
        backend.insert_job(&job).await.expect("insert");
        assert_eq!(backend.count_active_jobs("example.com").await.expect("count"), 1);

        job.transition(JobStatus::Running).expect("transition");
        job.transition(JobStatus::Completed).expect("transition");
        backend.update_job(&job).await.expect("update");
        assert_eq!(backend.count_active_jobs("example.com").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn recent_jobs_orders_newest_first() {
        let backend = MemoryBackend::new();
        let first = sample_job("a.com");
        let second = sample_job("b.com");
        backend.insert_job(&first).await.expect("insert");
        backend.insert_job(&second).await.expect("insert");
        let recent = backend.recent_jobs(10).await.expect("recent");
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
    }
}
