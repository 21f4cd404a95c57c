//! Job domain model.
//!
//! A [`Job`] is the unit of work the orchestrator admits, queues, dispatches,
//! and finalizes. Its `status` advances only forward — see
//! [`JobStatus::can_transition_to`] for the allowed edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The action a job asks a worker to perform against a target page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    NavigateExtract,
    Authenticate,
    FormSubmit,
    FileDownload,
    ScreenshotCapture,
    ScreenshotDiff,
    ApiIntercept,
}

/// Evasion strategy applied around navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Vanilla,
    Stealth,
    Assault,
}

impl Strategy {
    /// Map an `evasion_level` payload field to a strategy.
    ///
    /// `0` -> vanilla, `1` -> stealth, `>=2` -> assault.
    #[must_use]
    pub fn from_evasion_level(level: u32) -> Self {
        match level {
            0 => Self::Vanilla,
            1 => Self::Stealth,
            _ => Self::Assault,
        }
    }

    /// Infer a strategy from domain substrings when no `evasion_level` is given.
    #[must_use]
    pub fn infer_from_domain(domain: &str) -> Self {
        let lower = domain.to_lowercase();
        const ASSAULT_MARKERS: [&str; 3] = ["cloudflare", "akamai", "datadome"];
        const STEALTH_MARKERS: [&str; 3] = ["login", "account", "auth"];

        if ASSAULT_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Assault
        } else if STEALTH_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Stealth
        } else {
            Self::Vanilla
        }
    }
}

/// Priority class, lower value dispatched first. `0` is emergency, `3` is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Emergency = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// All priority classes, ordered from most to least urgent — the order
    /// the dispatch loop scans the per-priority streams in.
    pub const ORDER: [Self; 4] = [Self::Emergency, Self::High, Self::Normal, Self::Low];

    #[must_use]
    pub fn stream_key(self) -> String {
        format!("queue:{}", self as u8)
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Emergency),
            1 => Some(Self::High),
            2 => Some(Self::Normal),
            3 => Some(Self::Low),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Caller-declared authorization tier, gates which strategies may be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMode {
    Public,
    CustomerAuthorized,
    Internal,
}

impl Default for AuthorizationMode {
    fn default() -> Self {
        Self::Public
    }
}

/// Lifecycle state of a job. See [`JobStatus::can_transition_to`] for the
/// forward-only transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    RateLimited,
    CircuitBroken,
}

impl JobStatus {
    /// Whether this status is terminal — no further transitions are allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::RateLimited | Self::CircuitBroken
        )
    }

    /// Whether `self -> next` is an allowed forward transition.
    ///
    /// Terminal states never transition further. `Pending` may move to
    /// `Running` or directly to a terminal state (policy rejection prior to
    /// dispatch, or operator cancellation). `Running` may only move to a
    /// terminal state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Pending => true,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Durable job record. Persisted by the State Manager (C9); owned by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub domain: String,
    pub url: String,
    pub job_type: JobType,
    pub strategy: Strategy,
    pub priority: Priority,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub idempotency_key: Option<String>,
    pub authorization_mode: AuthorizationMode,
    /// Executor output, set once on a successful terminal transition (§4.10
    /// dispatch step 3, "store result").
    pub result: Option<serde_json::Value>,
}

/// Inputs accepted by job admission (`POST /api/v1/jobs`, or a workflow run).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub domain: String,
    pub url: String,
    pub job_type: JobType,
    pub strategy: Strategy,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub timeout_seconds: u64,
    pub authorization_mode: AuthorizationMode,
}

impl Job {
    /// Default timeout applied when the caller does not specify one.
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
    /// Default retry budget applied at creation.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Construct a fresh `pending` job from admitted input.
    #[must_use]
    pub fn new(input: NewJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: input.domain,
            url: input.url,
            job_type: input.job_type,
            strategy: input.strategy,
            priority: input.priority,
            status: JobStatus::Pending,
            payload: input.payload,
            attempts: 0,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            timeout_seconds: input.timeout_seconds,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            idempotency_key: input.idempotency_key,
            authorization_mode: input.authorization_mode,
            result: None,
        }
    }

    /// Attempt a guarded transition, setting `started_at`/`completed_at`
    /// exactly once as required by the state-manager invariants.
    ///
    /// # Errors
    ///
    /// Returns `Err(self.status)` (the current status) if `next` is not a
    /// legal transition from it.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobStatus> {
        if !self.status.can_transition_to(next) {
            return Err(self.status);
        }
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::new(NewJob {
            domain: "example.com".into(),
            url: "https://example.com".into(),
            job_type: JobType::NavigateExtract,
            strategy: Strategy::Vanilla,
            priority: Priority::Normal,
            payload: serde_json::json!({}),
            idempotency_key: None,
            timeout_seconds: Job::DEFAULT_TIMEOUT_SECONDS,
            authorization_mode: AuthorizationMode::Public,
        })
    }

    #[test]
    fn pending_to_running_sets_started_at_once() {
        let mut job = sample();
        job.transition(JobStatus::Running).expect("pending->running");
        let first = job.started_at;
        assert!(first.is_some());
        // Re-applying running is not a legal transition (not forward).
        assert!(job.transition(JobStatus::Running).is_err());
        assert_eq!(job.started_at, first);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut job = sample();
        job.transition(JobStatus::Running).expect("pending->running");
        job.transition(JobStatus::Completed).expect("running->completed");
        assert!(job.completed_at.is_some());
        assert!(job.transition(JobStatus::Failed).is_err());
    }

    #[test]
    fn pending_can_go_straight_to_cancelled() {
        let mut job = sample();
        assert!(job.transition(JobStatus::Cancelled).is_ok());
    }

    #[test]
    fn strategy_inference_matches_spec_examples() {
        assert_eq!(Strategy::infer_from_domain("auth.example.com"), Strategy::Stealth);
        assert_eq!(Strategy::infer_from_domain("cloudflare-guard.com"), Strategy::Assault);
        assert_eq!(Strategy::from_evasion_level(0), Strategy::Vanilla);
    }
}
