//! Queue depth introspection (§4.9 plumbing surfaced for operators).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use orc_core::job::Priority;

use crate::error::AppError;
use crate::state::AppState;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/queue/stats", get(queue_stats))
}

#[derive(Debug, Serialize)]
struct QueueStatsResponse {
    emergency: u64,
    high: u64,
    normal: u64,
    low: u64,
    delayed: u64,
    dead_letter: u64,
}

async fn queue_stats(State(state): State<Arc<AppState>>) -> Result<Json<QueueStatsResponse>, AppError> {
    let emergency = state.queue.stream_depth(Priority::Emergency).await?;
    let high = state.queue.stream_depth(Priority::High).await?;
    let normal = state.queue.stream_depth(Priority::Normal).await?;
    let low = state.queue.stream_depth(Priority::Low).await?;
    let delayed = state.queue.delayed_count().await?;
    let dead_letter = state.queue.dlq_len().await?;

    Ok(Json(QueueStatsResponse { emergency, high, normal, low, delayed, dead_letter }))
}
