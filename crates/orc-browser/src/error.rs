//! Errors surfaced by the browser pool and the strategy executors.

use thiserror::Error;

/// Failures from the Browser Pool (C6).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("browser pool exhausted: {instances} instances in use, ceiling {max_instances}")]
    Exhausted { instances: usize, max_instances: usize },

    #[error("failed to launch browser instance: {0}")]
    Launch(String),

    #[error("failed to open a page: {0}")]
    NewPage(String),

    #[error("pool instance {0} not found during release")]
    UnknownInstance(uuid::Uuid),
}

/// Failures from the Strategy Selector & Executors (C7). An `Action`
/// failure is caught by the caller and reported as `success=false`; a
/// `Transport` failure propagates to the Orchestrator per §4.7.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("browser pool: {0}")]
    Transport(#[from] PoolError),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(std::time::Duration),

    #[error("action failed: {0}")]
    Action(String),

    #[error("required selector not found: {0}")]
    RequiredSelectorMissing(String),

    #[error("invalid payload for job type: {0}")]
    InvalidPayload(String),

    #[error("cdp error: {0}")]
    Cdp(String),

    #[error("io error capturing artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl From<chromiumoxide::error::CdpError> for ExecutorError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Cdp(err.to_string())
    }
}

/// Errors from the Artifact Capturer (C8). Per §4.8 every capture is
/// best-effort — these are recorded per-kind, never propagated as a job
/// failure.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error writing artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("cdp error capturing artifact: {0}")]
    Cdp(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<chromiumoxide::error::CdpError> for ArtifactError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Cdp(err.to_string())
    }
}
