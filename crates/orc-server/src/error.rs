//! HTTP error types.
//!
//! Maps domain errors from every downstream crate into the status codes laid
//! out for the API surface: policy violations and validation failures never
//! create a job; everything else not recognized becomes a 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use orc_browser::{ArtifactError, ExecutorError, PoolError};
use orc_core::error::{CircuitBreakerError, CredentialError, IdempotencyError, PolicyViolation, RateLimiterError, WorkflowError};
use orc_queue::QueueError;
use orc_storage::StorageError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The requesting domain/strategy/authorization combination is denied.
    /// No job is created; an audit row has already been written by the caller.
    PolicyViolation(PolicyViolation),
    /// Client sent invalid input.
    Validation(String),
    /// Requested resource not found.
    NotFound(String),
    /// Rate limit exceeded; carries the `Retry-After` the caller should wait.
    RateLimited { retry_after_seconds: u64 },
    /// Internal server error — a downstream store or the browser layer failed.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::PolicyViolation(v) => (StatusCode::FORBIDDEN, "policy_violation", v.to_string()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::RateLimited { retry_after_seconds } => {
                let body = ErrorBody { error: "rate_limited", message: format!("retry after {retry_after_seconds}s") };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
                if let Ok(v) = axum::http::HeaderValue::from_str(&retry_after_seconds.to_string()) {
                    response.headers_mut().insert(axum::http::header::RETRY_AFTER, v);
                }
                return response;
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, axum::Json(ErrorBody { error: error_type, message })).into_response()
    }
}

impl From<PolicyViolation> for AppError {
    fn from(err: PolicyViolation) -> Self {
        Self::PolicyViolation(err)
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::UnknownTemplate(_) => Self::NotFound(err.to_string()),
            WorkflowError::MissingField(_) | WorkflowError::InvalidField { .. } => Self::Validation(err.to_string()),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<PoolError> for AppError {
    fn from(err: PoolError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ExecutorError> for AppError {
    fn from(err: ExecutorError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<RateLimiterError> for AppError {
    fn from(err: RateLimiterError) -> Self {
        Self::Internal(err.to_string())
    }
}
