//! Workflow listing and run endpoints (C11, §4.11).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use orc_core::job::JobStatus;

use crate::error::AppError;
use crate::state::AppState;
use crate::workflows;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/workflows", get(list))
        .route("/api/v1/workflows/{name}", get(get_one))
        .route("/api/v1/workflows/{name}/run", post(run))
}

async fn list(State(_state): State<Arc<AppState>>) -> Json<Vec<workflows::WorkflowSummary>> {
    Json(workflows::list_workflows())
}

async fn get_one(Path(name): Path<String>) -> Result<Json<orc_core::workflow::WorkflowTemplate>, AppError> {
    Ok(Json(workflows::get_workflow(&name)?))
}

#[derive(Debug, Serialize)]
struct RunWorkflowResponse {
    workflow_name: String,
    job_id: Uuid,
    status: JobStatus,
    created_at: DateTime<Utc>,
}

async fn run(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(input): Json<HashMap<String, Value>>,
) -> Result<Json<RunWorkflowResponse>, AppError> {
    let job = workflows::run_workflow(&state, &name, input).await?;
    Ok(Json(RunWorkflowResponse { workflow_name: name, job_id: job.id, status: job.status, created_at: job.created_at }))
}
