//! Token-bucket rate limiter (C2, §4.2).
//!
//! The refill/acquire arithmetic mirrors the Lua script the Python prototype
//! runs atomically via `EVALSHA` exactly, so the same bucket state transitions
//! the same way whether it is exercised through a real Redis backend
//! (`orc-queue`) or the in-memory fake used in tests here. `acquire` takes
//! `now` as an argument rather than reading the clock itself.

use async_trait::async_trait;

use crate::error::RateLimiterError;

/// A caller-facing rate limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Minute,
    Hour,
}

impl RateWindow {
    #[must_use]
    pub fn interval_seconds(self) -> f64 {
        match self {
            Self::Minute => 60.0,
            Self::Hour => 3600.0,
        }
    }

    #[must_use]
    pub fn key_suffix(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

/// Rate limit parameters for one identifier kind.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitProfile {
    pub tokens_per_minute: u32,
    pub tokens_per_hour: u32,
    pub max_tokens: u32,
}

impl RateLimitProfile {
    /// Default profile applied per-domain: 5/minute, 30/hour, burst 50.
    #[must_use]
    pub fn domain_default() -> Self {
        Self { tokens_per_minute: 5, tokens_per_hour: 30, max_tokens: 50 }
    }

    /// Default profile applied per-source-IP: 20/minute, 100/hour, burst 150.
    #[must_use]
    pub fn ip_default() -> Self {
        Self { tokens_per_minute: 20, tokens_per_hour: 100, max_tokens: 150 }
    }

    /// Fallback profile for identifier kinds that are neither domain nor IP.
    #[must_use]
    pub fn custom_default() -> Self {
        Self { tokens_per_minute: 10, tokens_per_hour: 50, max_tokens: 75 }
    }

    #[must_use]
    pub fn tokens_per_interval(self, window: RateWindow) -> u32 {
        match window {
            RateWindow::Minute => self.tokens_per_minute,
            RateWindow::Hour => self.tokens_per_hour,
        }
    }
}

/// Persisted token-bucket state for one `(identifier, window)` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
}

/// Storage seam for bucket state. A real implementation (Redis) must apply
/// the refill-then-acquire sequence atomically, the same guarantee the
/// prototype's Lua script gives via `EVALSHA`.
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<BucketState>, RateLimiterError>;
    async fn store(&self, key: &str, state: BucketState, ttl_seconds: u64) -> Result<(), RateLimiterError>;
}

/// Result of one acquire attempt.
#[derive(Debug, Clone, Copy)]
pub struct AcquireOutcome {
    pub success: bool,
    pub state: BucketState,
    pub wait_seconds: f64,
}

/// Refill a bucket to `now` and attempt to withdraw `requested` tokens.
///
/// Mirrors `RATE_LIMIT_SCRIPT` step for step: refill by whole elapsed
/// intervals (never fractional), cap at `max_tokens`, then either withdraw
/// and persist the new state, or compute how long until enough tokens exist.
#[must_use]
pub fn try_acquire(
    state: Option<BucketState>,
    now: f64,
    tokens_per_interval: u32,
    interval_seconds: f64,
    requested: u32,
    max_tokens: u32,
) -> AcquireOutcome {
    let state = state.unwrap_or(BucketState { tokens: f64::from(max_tokens), last_refill: now });
    let tokens_per_interval = f64::from(tokens_per_interval);
    let requested = f64::from(requested);
    let max_tokens = f64::from(max_tokens);

    let time_passed = now - state.last_refill;
    let intervals_passed = (time_passed / interval_seconds).floor();
    let tokens_to_add = intervals_passed * tokens_per_interval;

    let (mut current_tokens, mut last_refill) = (state.tokens, state.last_refill);
    if tokens_to_add > 0.0 {
        current_tokens = (current_tokens + tokens_to_add).min(max_tokens);
        last_refill += intervals_passed * interval_seconds;
    }

    if current_tokens >= requested {
        current_tokens -= requested;
        AcquireOutcome {
            success: true,
            state: BucketState { tokens: current_tokens, last_refill },
            wait_seconds: 0.0,
        }
    } else {
        let tokens_needed = requested - current_tokens;
        let intervals_needed = (tokens_needed / tokens_per_interval).ceil();
        let wait_seconds = (intervals_needed * interval_seconds - (now - last_refill)).max(0.0);
        AcquireOutcome {
            success: false,
            state: BucketState { tokens: current_tokens, last_refill },
            wait_seconds,
        }
    }
}

/// Release previously acquired tokens back into the bucket, capped at
/// `max_tokens`. Used when a minute-window acquire succeeds but the
/// corresponding hour-window acquire fails, so the minute tokens aren't lost.
#[must_use]
pub fn release(state: Option<BucketState>, tokens: u32, max_tokens: u32, now: f64) -> BucketState {
    let state = state.unwrap_or(BucketState { tokens: f64::from(max_tokens), last_refill: now });
    BucketState { tokens: (state.tokens + f64::from(tokens)).min(f64::from(max_tokens)), last_refill: state.last_refill }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bucket_refills_to_max_on_first_use() {
        let outcome = try_acquire(None, 0.0, 5, 60.0, 1, 50);
        // Absence means a full bucket, so the very first request against a
        // key that has never been seen before succeeds.
        assert!(outcome.success);
        assert_eq!(outcome.state.tokens, 49.0);
    }

    #[test]
    fn refills_after_interval_elapses() {
        let state = BucketState { tokens: 0.0, last_refill: 0.0 };
        let outcome = try_acquire(Some(state), 60.0, 5, 60.0, 1, 50);
        assert!(outcome.success);
        assert_eq!(outcome.state.tokens, 4.0);
    }

    #[test]
    fn caps_at_max_tokens() {
        let state = BucketState { tokens: 48.0, last_refill: 0.0 };
        let outcome = try_acquire(Some(state), 600.0, 5, 60.0, 1, 50);
        assert!(outcome.success);
        assert!(outcome.state.tokens <= 49.0);
    }

    #[test]
    fn failure_reports_wait_time() {
        let state = BucketState { tokens: 0.0, last_refill: 0.0 };
        let outcome = try_acquire(Some(state), 0.0, 5, 60.0, 1, 50);
        assert!(!outcome.success);
        assert!(outcome.wait_seconds > 0.0);
    }

    #[test]
    fn release_caps_at_max() {
        let state = BucketState { tokens: 49.5, last_refill: 0.0 };
        let released = release(Some(state), 5, 50, 10.0);
        assert_eq!(released.tokens, 50.0);
    }
}
