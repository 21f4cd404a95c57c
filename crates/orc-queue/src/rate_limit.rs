//! Redis-backed token bucket rate limiter (C2, §4.2).
//!
//! The refill-then-acquire sequence must be atomic across concurrent
//! callers, so unlike the circuit breaker and idempotency stores this does
//! not round-trip a `load`/modify/`store` pair through `orc-core` — it embeds
//! the whole operation as a Lua script run via `EVALSHA`, exactly mirroring
//! the prototype's `RATE_LIMIT_SCRIPT`. `orc_core::rate_limit::try_acquire`
//! is kept in sync with this script's arithmetic and is what the unit tests
//! in that crate exercise without a Redis instance.

use orc_core::rate_limit::{AcquireOutcome, BucketState, RateLimitProfile, RateWindow};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::QueueError;

const RATE_LIMIT_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local tokens_per_interval = tonumber(ARGV[2])
local interval_seconds = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local max_tokens = tonumber(ARGV[5])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')

-- Absence means a full bucket, matching orc_core::rate_limit::try_acquire.
local current_tokens = max_tokens
local last_refill = now

if bucket[1] then
    current_tokens = tonumber(bucket[1])
end

if bucket[2] then
    last_refill = tonumber(bucket[2])
end

local time_passed = now - last_refill
local intervals_passed = math.floor(time_passed / interval_seconds)
local tokens_to_add = intervals_passed * tokens_per_interval

if tokens_to_add > 0 then
    current_tokens = math.min(current_tokens + tokens_to_add, max_tokens)
    last_refill = last_refill + (intervals_passed * interval_seconds)
end

if current_tokens >= requested then
    current_tokens = current_tokens - requested
    redis.call('HMSET', key, 'tokens', current_tokens, 'last_refill', last_refill)
    redis.call('EXPIRE', key, math.ceil(interval_seconds * 2))
    return {1, current_tokens, last_refill}
else
    local tokens_needed = requested - current_tokens
    local intervals_needed = math.ceil(tokens_needed / tokens_per_interval)
    local wait_seconds = (intervals_needed * interval_seconds) - (now - last_refill)
    wait_seconds = math.max(wait_seconds, 0)

    redis.call('HMSET', key, 'tokens', current_tokens, 'last_refill', last_refill)
    redis.call('EXPIRE', key, math.ceil(interval_seconds * 2))
    return {0, current_tokens, wait_seconds}
end
";

/// A distributed token-bucket rate limiter backed by Redis.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    script: redis::Script,
    key_prefix: String,
}

impl RedisRateLimiter {
    #[must_use]
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self { conn, script: redis::Script::new(RATE_LIMIT_SCRIPT), key_prefix: key_prefix.into() }
    }

    fn key(&self, window: RateWindow) -> String {
        format!("{}:{}", self.key_prefix, window.key_suffix())
    }

    /// Attempt to acquire `tokens` from the bucket for `window`. Fails open
    /// (returns success) if Redis itself is unreachable — per §7,
    /// `InfrastructureFailure` against the rate limiter must never block a
    /// job, only the rate limit's own accounting does.
    pub async fn acquire(&self, window: RateWindow, profile: RateLimitProfile, tokens: u32, now: f64) -> AcquireOutcome {
        let key = self.key(window);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<(i64, f64, f64)> = self
            .script
            .key(&key)
            .arg(now)
            .arg(profile.tokens_per_interval(window))
            .arg(window.interval_seconds())
            .arg(tokens)
            .arg(profile.max_tokens)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok((success, remaining, wait_or_refill)) => {
                if success == 1 {
                    AcquireOutcome {
                        success: true,
                        state: BucketState { tokens: remaining, last_refill: wait_or_refill },
                        wait_seconds: 0.0,
                    }
                } else {
                    AcquireOutcome {
                        success: false,
                        state: BucketState { tokens: remaining, last_refill: now },
                        wait_seconds: wait_or_refill,
                    }
                }
            }
            Err(_) => AcquireOutcome { success: true, state: BucketState { tokens: 0.0, last_refill: now }, wait_seconds: 0.0 },
        }
    }

    /// Release previously acquired tokens (used when a minute-window acquire
    /// succeeds but the paired hour-window acquire fails).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if Redis is unreachable.
    pub async fn release(&self, window: RateWindow, profile: RateLimitProfile, tokens: u32) -> Result<(), QueueError> {
        let key = self.key(window);
        let mut conn = self.conn.clone();
        let current: Option<f64> = conn.hget(&key, "tokens").await.map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
        let new_tokens = (current.unwrap_or(0.0) + f64::from(tokens)).min(f64::from(profile.max_tokens));
        let _: () = conn
            .hset(&key, "tokens", new_tokens)
            .await
            .map_err(|e| QueueError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Dual-window (minute then hour) acquire with release-on-partial-failure,
/// matching `acquire_with_backoff`'s single-attempt body in the prototype
/// (retry/backoff itself is the orchestrator's concern, not the limiter's).
///
/// # Errors
///
/// Never returns an error — Redis failures are handled by failing open
/// inside [`RedisRateLimiter::acquire`].
pub async fn acquire_dual_window(
    limiter: &RedisRateLimiter,
    profile: RateLimitProfile,
    tokens: u32,
    now: f64,
) -> orc_core::policy::RateLimitOutcome {
    let minute = limiter.acquire(RateWindow::Minute, profile, tokens, now).await;
    if !minute.success {
        return orc_core::policy::RateLimitOutcome { minute_ok: false, hour_ok: true };
    }

    let hour = limiter.acquire(RateWindow::Hour, profile, tokens, now).await;
    if !hour.success {
        let _ = limiter.release(RateWindow::Minute, profile, tokens).await;
    }

    orc_core::policy::RateLimitOutcome { minute_ok: minute.success, hour_ok: hour.success }
}
