//! HTTP middleware: API-key verification and per-caller rate limiting
//! (§4.12, §6.1).
//!
//! Both layers run in front of every `/api/v1` handler. Health checks are
//! exempt from both so a load balancer probe never needs a key or counts
//! against anyone's bucket.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use orc_core::rate_limit::RateLimitProfile;
use orc_queue::acquire_dual_window;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

/// Verify the `X-API-Key` header against [`crate::config::ServerConfig::api_key`].
///
/// A no-op when no key is configured — key enforcement is opt-in.
pub async fn api_key_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(req).await;
    };

    let provided = req.headers().get("X-API-Key").and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if key == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({ "error": "unauthorized", "message": "missing or invalid X-API-Key header" })),
        )
            .into_response(),
    }
}

/// Token-bucket rate limit keyed by the caller's API key, falling back to
/// the first `X-Forwarded-For` hop when no key is present.
pub async fn rate_limit_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let api_key = req.headers().get("X-API-Key").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let caller_id = api_key.clone().unwrap_or_else(|| {
        req.headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .map(str::to_owned)
            .unwrap_or_else(|| "unknown".to_owned())
    });

    let profile = if api_key.is_some() { RateLimitProfile::custom_default() } else { RateLimitProfile::ip_default() };
    let limiter = state.caller_rate_limiter(&caller_id);
    let now = Utc::now().timestamp() as f64;
    let outcome = acquire_dual_window(&limiter, profile, 1, now).await;

    if !outcome.passed() {
        let mut response = AppError::RateLimited { retry_after_seconds: 60 }.into_response();
        if let Ok(limit) = HeaderValue::from_str(&profile.tokens_per_minute.to_string()) {
            response.headers_mut().insert("X-RateLimit-Limit", limit);
        }
        if let Ok(remaining) = HeaderValue::from_str("0") {
            response.headers_mut().insert("X-RateLimit-Remaining", remaining);
        }
        return response;
    }

    next.run(req).await
}
