//! HTTP API surface (§4.12, §6.1).
//!
//! Every handler lives under `/api/v1`, guarded by the API-key and
//! rate-limit middleware layered on in `main.rs`. `/health` is mounted
//! separately, outside both layers, so a load balancer probe never needs a
//! key or counts against anyone's bucket.

mod health;
mod jobs;
mod ops;
mod queue;
mod workflows;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` router.
#[must_use]
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(jobs::router())
        .merge(queue::router())
        .merge(ops::router())
        .merge(workflows::router())
}

/// Build the unauthenticated `/health` router.
#[must_use]
pub fn health_router() -> Router<Arc<AppState>> {
    health::router()
}
