//! Operator status endpoint (C13, §4.13): a single snapshot of storage and
//! queue health, recent jobs, recent success rate, and browser pool
//! occupancy, for dashboards and on-call triage.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use orc_browser::PoolStats;
use orc_core::job::{Job, Priority};

use crate::error::AppError;
use crate::state::AppState;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/ops/status", get(status)).route("/api/v1/ops/circuit/{domain}", get(circuit_status))
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    storage: bool,
    pool: bool,
}

#[derive(Debug, Serialize)]
struct QueueDepths {
    emergency: u64,
    high: u64,
    normal: u64,
    low: u64,
    delayed: u64,
    dead_letter: u64,
}

#[derive(Debug, Serialize)]
struct OpsStatusResponse {
    health: HealthSnapshot,
    queue: QueueDepths,
    recent_jobs: Vec<Job>,
    recent_success_rate: f64,
    worker_count: usize,
    pool: PoolStats,
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<OpsStatusResponse>, AppError> {
    let storage_ok = state.storage.health_check().await;
    let pool_ok = state.pool.health_check().await;

    let queue = QueueDepths {
        emergency: state.queue.stream_depth(Priority::Emergency).await?,
        high: state.queue.stream_depth(Priority::High).await?,
        normal: state.queue.stream_depth(Priority::Normal).await?,
        low: state.queue.stream_depth(Priority::Low).await?,
        delayed: state.queue.delayed_count().await?,
        dead_letter: state.queue.dlq_len().await?,
    };

    let recent_jobs = state.storage.recent_jobs(10).await?;
    let recent_success_rate = state.storage.recent_success_rate(100).await?;
    let pool = state.pool.stats().await;

    Ok(Json(OpsStatusResponse {
        health: HealthSnapshot { storage: storage_ok, pool: pool_ok },
        queue,
        recent_jobs,
        recent_success_rate,
        worker_count: state.config.worker_count,
        pool,
    }))
}

/// Per-domain circuit breaker snapshot, exposing the `Closed`/`HalfOpen`/`Open`
/// gauge value the forced-state metrics in the original system tracked.
#[derive(Debug, Serialize)]
struct CircuitStatusResponse {
    domain: String,
    state: orc_core::circuit_breaker::CircuitState,
    gauge_value: u8,
    consecutive_failures: u32,
}

async fn circuit_status(State(state): State<Arc<AppState>>, Path(domain): Path<String>) -> Result<Json<CircuitStatusResponse>, AppError> {
    let snapshot = state.circuit_store.load(&domain).await?;
    Ok(Json(CircuitStatusResponse {
        domain,
        state: snapshot.state,
        gauge_value: snapshot.state.gauge_value(),
        consecutive_failures: snapshot.consecutive_failures,
    }))
}
