//! Per-domain circuit breaker (C3, §4.3).
//!
//! A three-state machine (`Closed` -> `Open` -> `HalfOpen`) gating whether a
//! domain may be dispatched against. The state transition logic is pure and
//! takes the current time as an argument so it is unit-testable without a
//! clock or a store; [`CircuitBreakerStore`] is the seam a backing store
//! (Redis in `orc-queue`) implements to persist [`CircuitSnapshot`] with a TTL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CircuitBreakerError;

/// Default consecutive-failure threshold before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Default cooldown durations tried in sequence as the circuit reopens
/// repeatedly: 1 hour, 6 hours, 24 hours.
pub const DEFAULT_COOLDOWN_SEQUENCE: [u64; 3] = [3600, 21600, 86400];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn gauge_value(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

/// Record of the most recent failure, kept for operator diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastFailure {
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
}

/// Persisted state for one domain's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_failure: Option<LastFailure>,
    pub forced: bool,
    pub half_open_token_consumed: bool,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            cooldown_until: None,
            last_failure: None,
            forced: false,
            half_open_token_consumed: false,
        }
    }
}

/// Storage seam for circuit state. Implementations persist with a TTL so a
/// domain that stops being exercised entirely eventually forgets its history.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    async fn load(&self, domain: &str) -> Result<CircuitSnapshot, CircuitBreakerError>;
    async fn store(&self, domain: &str, snapshot: &CircuitSnapshot, ttl: Duration) -> Result<(), CircuitBreakerError>;
}

/// Outcome of an `allow_execution` check.
#[derive(Debug, Clone, Copy)]
pub struct AllowDecision {
    pub allowed: bool,
    pub remaining_cooldown: Duration,
}

/// Pure circuit breaker logic for one domain, parameterized by threshold and
/// cooldown sequence so tests and callers never hardcode the defaults twice.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub failure_threshold: u32,
    pub cooldown_sequence: Vec<u64>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD, cooldown_sequence: DEFAULT_COOLDOWN_SEQUENCE.to_vec() }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown_sequence: Vec<u64>) -> Self {
        Self { failure_threshold, cooldown_sequence }
    }

    fn cooldown_for_index(&self, index: u32) -> Duration {
        let idx = usize::try_from(index).unwrap_or(usize::MAX).min(self.cooldown_sequence.len() - 1);
        Duration::from_secs(self.cooldown_sequence[idx])
    }

    /// Decide whether execution is allowed right now, returning the decision
    /// and, when the stored state must change (`Open` -> `HalfOpen`
    /// transition, or half-open token consumption), the snapshot to persist.
    #[must_use]
    pub fn allow_execution(&self, snapshot: &CircuitSnapshot, now: DateTime<Utc>) -> (AllowDecision, Option<CircuitSnapshot>) {
        match snapshot.state {
            CircuitState::Closed => (AllowDecision { allowed: true, remaining_cooldown: Duration::ZERO }, None),
            CircuitState::Open => {
                let cooldown_until = snapshot.cooldown_until.unwrap_or(now);
                if now >= cooldown_until {
                    let mut next = snapshot.clone();
                    next.state = CircuitState::HalfOpen;
                    next.half_open_token_consumed = false;
                    (AllowDecision { allowed: true, remaining_cooldown: Duration::ZERO }, Some(next))
                } else {
                    let remaining = (cooldown_until - now).to_std().unwrap_or(Duration::ZERO);
                    (AllowDecision { allowed: false, remaining_cooldown: remaining }, None)
                }
            }
            CircuitState::HalfOpen => {
                let mut next = snapshot.clone();
                next.half_open_token_consumed = true;
                (AllowDecision { allowed: true, remaining_cooldown: Duration::ZERO }, Some(next))
            }
        }
    }

    /// A successful execution resets the circuit from `HalfOpen` or `Closed`.
    /// A success observed while `Open` (an out-of-band probe outside the
    /// breaker's own half-open gate) is ignored rather than silently closing
    /// a circuit that is still in its cooldown window.
    #[must_use]
    pub fn record_success(&self, snapshot: &CircuitSnapshot) -> CircuitSnapshot {
        match snapshot.state {
            CircuitState::HalfOpen | CircuitState::Closed => CircuitSnapshot::default(),
            CircuitState::Open => snapshot.clone(),
        }
    }

    /// A failed execution increments the failure count and may open (or
    /// re-open) the circuit with the next cooldown in the sequence.
    #[must_use]
    pub fn record_failure(&self, snapshot: &CircuitSnapshot, error_type: &str, now: DateTime<Utc>) -> CircuitSnapshot {
        let last_failure = Some(LastFailure { timestamp: now, error_type: error_type.to_owned() });

        if snapshot.state == CircuitState::HalfOpen {
            let failure_count = snapshot.consecutive_failures + 1;
            let cooldown = self.cooldown_for_index(failure_count.saturating_sub(self.failure_threshold));
            return CircuitSnapshot {
                state: CircuitState::Open,
                consecutive_failures: failure_count,
                cooldown_until: Some(now + chrono::Duration::from_std(cooldown).unwrap_or_default()),
                last_failure,
                forced: false,
                half_open_token_consumed: false,
            };
        }

        let current_failures = snapshot.consecutive_failures + 1;
        if current_failures >= self.failure_threshold {
            let cooldown = self.cooldown_for_index(current_failures - self.failure_threshold);
            CircuitSnapshot {
                state: CircuitState::Open,
                consecutive_failures: current_failures,
                cooldown_until: Some(now + chrono::Duration::from_std(cooldown).unwrap_or_default()),
                last_failure,
                forced: false,
                half_open_token_consumed: false,
            }
        } else {
            CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: current_failures,
                cooldown_until: None,
                last_failure,
                forced: false,
                half_open_token_consumed: false,
            }
        }
    }

    /// Force the circuit open regardless of the current failure count, e.g.
    /// for an operator-initiated pause.
    #[must_use]
    pub fn force_open(&self, cooldown: Duration, now: DateTime<Utc>) -> CircuitSnapshot {
        CircuitSnapshot {
            state: CircuitState::Open,
            consecutive_failures: self.failure_threshold,
            cooldown_until: Some(now + chrono::Duration::from_std(cooldown).unwrap_or_default()),
            last_failure: Some(LastFailure { timestamp: now, error_type: "forced".to_owned() }),
            forced: true,
            half_open_token_consumed: false,
        }
    }

    #[must_use]
    pub fn force_reset(&self) -> CircuitSnapshot {
        CircuitSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).expect("valid timestamp")
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::default();
        let mut snapshot = CircuitSnapshot::default();
        for i in 0..3 {
            snapshot = breaker.record_failure(&snapshot, "timeout", t(i));
        }
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 3);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::default();
        let mut snapshot = CircuitSnapshot::default();
        snapshot = breaker.record_failure(&snapshot, "timeout", t(0));
        snapshot = breaker.record_failure(&snapshot, "timeout", t(1));
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[test]
    fn open_denies_until_cooldown_elapses() {
        let breaker = CircuitBreaker::default();
        let mut snapshot = CircuitSnapshot::default();
        for i in 0..3 {
            snapshot = breaker.record_failure(&snapshot, "timeout", t(i));
        }
        let (decision, change) = breaker.allow_execution(&snapshot, t(10));
        assert!(!decision.allowed);
        assert!(change.is_none());

        let (decision, change) = breaker.allow_execution(&snapshot, t(3600));
        assert!(decision.allowed);
        let half_open = change.expect("transitions to half-open");
        assert_eq!(half_open.state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::default();
        let half_open = CircuitSnapshot { state: CircuitState::HalfOpen, ..CircuitSnapshot::default() };
        let result = breaker.record_success(&half_open);
        assert_eq!(result.state, CircuitState::Closed);
        assert_eq!(result.consecutive_failures, 0);
    }

    #[test]
    fn half_open_failure_uses_next_cooldown_in_sequence() {
        let breaker = CircuitBreaker::default();
        let half_open =
            CircuitSnapshot { state: CircuitState::HalfOpen, consecutive_failures: 3, ..CircuitSnapshot::default() };
        let result = breaker.record_failure(&half_open, "timeout", t(0));
        assert_eq!(result.state, CircuitState::Open);
        let cooldown_until = result.cooldown_until.expect("set");
        // failure_count=4, threshold=3 -> cooldown index 4-3=1 -> 21600s (6h).
        assert_eq!((cooldown_until - t(0)).num_seconds(), 21_600);
    }

    #[test]
    fn force_open_and_reset() {
        let breaker = CircuitBreaker::default();
        let forced = breaker.force_open(Duration::from_secs(60), t(0));
        assert!(forced.forced);
        assert_eq!(forced.state, CircuitState::Open);
        let reset = breaker.force_reset();
        assert_eq!(reset.state, CircuitState::Closed);
    }
}
