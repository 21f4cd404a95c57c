//! Job submission, lookup, and cancellation (§4.12 `POST/GET /api/v1/jobs`).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use orc_core::job::{AuthorizationMode, Job, JobType, NewJob, Priority, Strategy};

use crate::error::AppError;
use crate::orchestrator;
use crate::state::AppState;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/jobs/{job_id}", get(get_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(cancel_job))
}

/// Request body for `POST /api/v1/jobs`.
///
/// `strategy` is optional: when absent it is inferred from `domain` via
/// [`Strategy::infer_from_domain`], matching the admission path a workflow
/// run does not take (workflows always pass an explicit strategy).
#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    domain: String,
    url: String,
    job_type: JobType,
    strategy: Option<Strategy>,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    authorization_mode: Option<AuthorizationMode>,
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    job_id: Uuid,
    status: orc_core::job::JobStatus,
    domain: String,
    job_type: JobType,
}

impl From<&Job> for CreateJobResponse {
    fn from(job: &Job) -> Self {
        Self { job_id: job.id, status: job.status, domain: job.domain.clone(), job_type: job.job_type }
    }
}

async fn create_job(State(state): State<Arc<AppState>>, Json(req): Json<CreateJobRequest>) -> Result<Json<CreateJobResponse>, AppError> {
    let strategy = req.strategy.unwrap_or_else(|| Strategy::infer_from_domain(&req.domain));

    let new_job = NewJob {
        domain: req.domain,
        url: req.url,
        job_type: req.job_type,
        strategy,
        priority: req.priority.unwrap_or_default(),
        payload: req.payload.unwrap_or_else(|| serde_json::json!({})),
        idempotency_key: req.idempotency_key,
        timeout_seconds: req.timeout_seconds.unwrap_or(state.config.default_job_timeout_seconds),
        authorization_mode: req.authorization_mode.unwrap_or_default(),
    };

    let job = orchestrator::admit_job(&state, new_job).await?;
    Ok(Json(CreateJobResponse::from(&job)))
}

async fn get_job(State(state): State<Arc<AppState>>, Path(job_id): Path<Uuid>) -> Result<Json<Job>, AppError> {
    let job = state.storage.get_job(job_id).await?.ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(job))
}

async fn cancel_job(State(state): State<Arc<AppState>>, Path(job_id): Path<Uuid>) -> Result<Json<Job>, AppError> {
    let job = orchestrator::cancel_job(&state, job_id).await?;
    Ok(Json(job))
}
