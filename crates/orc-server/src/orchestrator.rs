//! Job Orchestrator: admission and the dispatch loop (C10, §4.10).
//!
//! Admission is a single request/response path: idempotency replay check,
//! policy evaluation, a circuit-breaker fast-fail check, then persistence
//! and enqueue. The dispatch loop is a pool of independent workers, one per
//! [`crate::config::ServerConfig::worker_count`], each scanning the four
//! priority streams in [`Priority::ORDER`] and running admitted jobs through
//! [`orc_browser::strategy::execute`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orc_browser::{strategy, ExecutorError};
use orc_core::audit::{AuditLogEntry, AuditRecord};
use orc_core::error::{PolicyAction, PolicyViolation};
use orc_core::idempotency::{self, AdmissionOutcome};
use orc_core::job::{Job, JobStatus, NewJob, Priority};
use orc_core::policy::{evaluate_admission, AdmissionRequest, DomainPolicy, RateLimitOutcome};
use orc_core::rate_limit::RateLimitProfile;
use orc_queue::acquire_dual_window;
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// How long a circuit breaker snapshot is kept before it is forgotten.
const CIRCUIT_SNAPSHOT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Exponential backoff base (seconds) for retried jobs: `base * factor^(attempts-1) + jitter`.
const RETRY_BASE_SECONDS: f64 = 2.0;
const RETRY_FACTOR: f64 = 2.0;

fn rate_limit_profile_for(policy: Option<&DomainPolicy>) -> RateLimitProfile {
    let default = RateLimitProfile::domain_default();
    match policy {
        Some(p) => RateLimitProfile {
            tokens_per_minute: p.rate_limit_per_minute.unwrap_or(default.tokens_per_minute),
            tokens_per_hour: p.rate_limit_per_hour.unwrap_or(default.tokens_per_hour),
            max_tokens: default.max_tokens,
        },
        None => default,
    }
}

fn retry_delay_seconds(attempts: u32) -> f64 {
    let exponent = attempts.saturating_sub(1);
    let backoff = RETRY_BASE_SECONDS * RETRY_FACTOR.powi(exponent as i32);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    backoff + jitter
}

/// Admit a new job: idempotency replay, policy decision, circuit-breaker
/// fast-fail, then persistence and enqueue.
///
/// # Errors
///
/// Returns [`AppError::PolicyViolation`] if admission is denied, or
/// [`AppError::Internal`] if a downstream store is unreachable.
pub async fn admit_job(state: &AppState, new_job: NewJob) -> Result<Job, AppError> {
    let mut job = Job::new(new_job);

    if let Some(key) = job.idempotency_key.clone() {
        let (owner, outcome) = idempotency::admit(&*state.idempotency_store, &key, job.id).await?;
        match outcome {
            AdmissionOutcome::Replayed => {
                if let Some(existing) = state.storage.get_job(owner).await? {
                    info!(job_id = %existing.id, "idempotency replay, returning existing job");
                    return Ok(existing);
                }
                // The earlier admission under this key never reached
                // persistence (it was denied by policy). Reuse its
                // reserved id rather than leaving the key permanently
                // pointed at a job that will never exist.
                job.id = owner;
            }
            AdmissionOutcome::Created => {}
        }
    }

    let policy = state.storage.get_policy(&job.domain).await?;
    let now = Utc::now();
    let now_unix = now.timestamp() as f64;

    let profile = rate_limit_profile_for(policy.as_ref());
    let limiter = state.domain_rate_limiter(&job.domain);
    let rate_limit: RateLimitOutcome = acquire_dual_window(&limiter, profile, 1, now_unix).await;

    let current_concurrency = state.storage.count_active_jobs(&job.domain).await?;

    let admission_req = AdmissionRequest {
        policy: policy.as_ref(),
        requested_strategy: job.strategy,
        authorization_mode: job.authorization_mode,
        rate_limit,
        current_concurrency,
    };
    let (action, reason) = evaluate_admission(&admission_req);
    let context = serde_json::json!({ "priority": job.priority as u8, "job_type": format!("{:?}", job.job_type) });

    if action != PolicyAction::Allow {
        let entry = AuditLogEntry::from_record(AuditRecord {
            job_id: None,
            domain: &job.domain,
            policy_id: policy.as_ref().map(|p| p.id),
            authorization_mode: job.authorization_mode,
            strategy: job.strategy,
            action,
            reason: &reason,
            user_id: None,
            ip_address: None,
            context,
        });
        if let Err(e) = state.storage.append_audit(&entry).await {
            warn!(error = %e, domain = %job.domain, "failed to write admission audit row");
        }
        return Err(PolicyViolation::new(action, reason).into());
    }

    let snapshot = state.circuit_store.load(&job.domain).await?;
    let (decision, next_snapshot) = state.circuit_breaker.allow_execution(&snapshot, now);
    if let Some(next) = &next_snapshot {
        state.circuit_store.store(&job.domain, next, CIRCUIT_SNAPSHOT_TTL).await?;
    }

    let entry = AuditLogEntry::from_record(AuditRecord {
        job_id: Some(job.id),
        domain: &job.domain,
        policy_id: policy.as_ref().map(|p| p.id),
        authorization_mode: job.authorization_mode,
        strategy: job.strategy,
        action: PolicyAction::Allow,
        reason: &reason,
        user_id: None,
        ip_address: None,
        context,
    });
    if let Err(e) = state.storage.append_audit(&entry).await {
        warn!(error = %e, domain = %job.domain, "failed to write admission audit row");
    }

    if !decision.allowed {
        job.error = Some(format!("circuit open for {}, retry in {:?}", job.domain, decision.remaining_cooldown));
        job.transition(JobStatus::CircuitBroken).map_err(|s| AppError::Internal(format!("unexpected status {s:?} at creation")))?;
        state.storage.insert_job(&job).await?;
        info!(job_id = %job.id, domain = %job.domain, "admission denied: circuit breaker open");
        return Ok(job);
    }

    state.storage.insert_job(&job).await?;
    state.queue.ensure_group(job.priority).await?;
    state.queue.enqueue(job.priority, job.id).await?;
    info!(job_id = %job.id, domain = %job.domain, priority = ?job.priority, "job admitted");
    Ok(job)
}

/// Request an already-admitted job be cancelled.
///
/// A still-`pending` job is cancelled immediately. A `running` job cannot be
/// interrupted mid-execution (the executor pipeline has no cancellation
/// point inside a navigation), so it is marked and finalized as `cancelled`
/// once the in-flight `execute` call returns, discarding whatever result it
/// produced.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if no such job exists.
pub async fn cancel_job(state: &AppState, job_id: Uuid) -> Result<Job, AppError> {
    let mut job = state.storage.get_job(job_id).await?.ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))?;

    if job.status.is_terminal() {
        return Ok(job);
    }

    if job.status == JobStatus::Pending {
        job.transition(JobStatus::Cancelled).map_err(|s| AppError::Internal(format!("unexpected status {s:?} cancelling")))?;
        state.storage.update_job(&job).await?;
        return Ok(job);
    }

    state.cancellations.lock().await.insert(job_id);
    Ok(job)
}

/// Run one dispatch worker, scanning the four priority streams in strict
/// order on every tick. Several of these run concurrently, one per
/// configured worker slot, all sharing the same Redis consumer group so no
/// job is ever handed to more than one worker.
pub async fn run_dispatch_worker(state: Arc<AppState>, consumer_id: usize, mut shutdown: watch::Receiver<bool>) {
    for priority in Priority::ORDER {
        if let Err(e) = state.queue.ensure_group(priority).await {
            error!(error = %e, ?priority, consumer_id, "failed to ensure consumer group");
        }
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut handled_any = false;
        for priority in Priority::ORDER {
            if *shutdown.borrow() {
                break;
            }
            match state.queue.dequeue(priority, 1, 200).await {
                Ok(entries) => {
                    for entry in entries {
                        handled_any = true;
                        process_job(&state, priority, entry.job_id, &entry.stream_entry_id).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, ?priority, consumer_id, "dequeue failed");
                }
            }
        }

        if !handled_any {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

async fn process_job(state: &AppState, priority: Priority, job_id: Uuid, stream_entry_id: &str) {
    let mut job = match state.storage.get_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(%job_id, "dequeued job missing from storage, acking");
            let _ = state.queue.ack(priority, stream_entry_id).await;
            return;
        }
        Err(e) => {
            error!(error = %e, %job_id, "storage unreachable dequeuing job, leaving unacked for redelivery");
            return;
        }
    };

    if job.status.is_terminal() {
        let _ = state.queue.ack(priority, stream_entry_id).await;
        return;
    }

    if job.transition(JobStatus::Running).is_err() {
        warn!(%job_id, status = ?job.status, "job not in a dispatchable state, acking");
        let _ = state.queue.ack(priority, stream_entry_id).await;
        return;
    }
    job.attempts += 1;
    if let Err(e) = state.storage.update_job(&job).await {
        error!(error = %e, %job_id, "failed to persist running transition");
    }

    let navigation_timeout = Duration::from_secs(job.timeout_seconds.max(1));
    let outcome = strategy::execute(&state.pool, &job, navigation_timeout, &state.cookies, &state.artifacts).await;

    if state.cancellations.lock().await.remove(&job_id) {
        job.error = Some("cancelled by operator".to_owned());
        let _ = job.transition(JobStatus::Cancelled);
        if let Err(e) = state.storage.update_job(&job).await {
            error!(error = %e, %job_id, "failed to persist cancellation");
        }
        let _ = state.queue.ack(priority, stream_entry_id).await;
        return;
    }

    match outcome {
        Ok(result) => finalize_success(state, &mut job, result).await,
        Err(ExecutorError::Transport(transport_err)) => {
            handle_retryable(state, &mut job, priority, transport_err.to_string()).await;
        }
        Err(ExecutorError::NavigationTimeout(timeout)) => {
            handle_retryable(state, &mut job, priority, format!("navigation timed out after {timeout:?}")).await;
        }
        Err(other) => finalize_failure(state, &mut job, other.to_string()).await,
    }

    let _ = state.queue.ack(priority, stream_entry_id).await;
}

async fn record_circuit_outcome(state: &AppState, domain: &str, success: bool, error_type: &str) {
    let snapshot = match state.circuit_store.load(domain).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, domain, "circuit breaker store unreachable, skipping update");
            return;
        }
    };
    let next = if success {
        state.circuit_breaker.record_success(&snapshot)
    } else {
        state.circuit_breaker.record_failure(&snapshot, error_type, Utc::now())
    };
    if let Err(e) = state.circuit_store.store(domain, &next, CIRCUIT_SNAPSHOT_TTL).await {
        warn!(error = %e, domain, "failed to persist circuit breaker state");
    }
}

async fn finalize_success(state: &AppState, job: &mut Job, result: strategy::ExecutionResult) {
    if !result.success {
        job.error.clone_from(&result.error);
    }
    job.result = Some(result.details.clone());
    if job.transition(JobStatus::Completed).is_err() {
        error!(job_id = %job.id, "illegal transition to completed");
        return;
    }
    record_circuit_outcome(state, &job.domain, true, "").await;
    if let Err(e) = state.storage.update_job(job).await {
        error!(error = %e, job_id = %job.id, "failed to persist completed job");
    }
    info!(job_id = %job.id, success = result.success, duration_seconds = result.duration_seconds, "job finished");

    if let Err(e) = crate::workflows::post_process_if_workflow(state, job, &result).await {
        warn!(job_id = %job.id, error = %e, "workflow post-processing failed");
    }
}

async fn handle_retryable(state: &AppState, job: &mut Job, priority: Priority, error_text: String) {
    job.error = Some(error_text.clone());
    record_circuit_outcome(state, &job.domain, false, "transport").await;

    if job.attempts < job.max_attempts {
        job.status = JobStatus::Pending;
        let delay = retry_delay_seconds(job.attempts);
        let ready_at = Utc::now().timestamp() as f64 + delay;
        if let Err(e) = state.storage.update_job(job).await {
            error!(error = %e, job_id = %job.id, "failed to persist retry state");
        }
        if let Err(e) = state.queue.schedule_delayed(job.id, priority, ready_at).await {
            error!(error = %e, job_id = %job.id, "failed to schedule delayed retry");
        }
        info!(job_id = %job.id, attempts = job.attempts, delay_seconds = delay, "retrying after transient failure");
    } else {
        warn!(job_id = %job.id, attempts = job.attempts, "retry budget exhausted, moving to dead letter");
        if job.transition(JobStatus::Failed).is_err() {
            error!(job_id = %job.id, "illegal transition to failed");
            return;
        }
        if let Err(e) = state.storage.update_job(job).await {
            error!(error = %e, job_id = %job.id, "failed to persist dead-lettered job");
        }
        if let Err(e) = state.queue.push_dlq(job.id).await {
            error!(error = %e, job_id = %job.id, "failed to push job to dead-letter list");
        }
    }
}

async fn finalize_failure(state: &AppState, job: &mut Job, error_text: String) {
    job.error = Some(error_text);
    if job.transition(JobStatus::Failed).is_err() {
        error!(job_id = %job.id, "illegal transition to failed");
        return;
    }
    record_circuit_outcome(state, &job.domain, false, "execution_error").await;
    if let Err(e) = state.storage.update_job(job).await {
        error!(error = %e, job_id = %job.id, "failed to persist failed job");
    }
    warn!(job_id = %job.id, error = job.error.as_deref().unwrap_or(""), "job failed terminally");
}

/// Periodically move ready delayed jobs back onto their priority streams.
pub async fn run_delayed_promoter(state: Arc<AppState>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now().timestamp() as f64;
                match state.queue.promote_ready_delayed(now).await {
                    Ok(0) => {}
                    Ok(n) => info!(promoted = n, "promoted delayed jobs"),
                    Err(e) => error!(error = %e, "failed to promote delayed jobs"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

