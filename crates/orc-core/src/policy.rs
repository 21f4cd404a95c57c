//! Domain policy model and the pure admission decision function (C4, §4.4).
//!
//! The decision function itself takes no I/O — callers perform the rate
//! limit and concurrency lookups and pass the results in. This keeps the
//! six-step decision order in §4.4 unit-testable without a Redis or Postgres
//! instance, the same way the teacher's `PolicyStore::evaluate` (path +
//! capability matching) is pure over an in-memory `Policy` document.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PolicyAction;
use crate::job::{AuthorizationMode, Strategy};

/// Per-domain admission policy. Unique by `domain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPolicy {
    pub id: Uuid,
    pub domain: String,
    pub allowed: bool,
    pub denied: bool,
    pub rate_limit_per_minute: Option<u32>,
    pub rate_limit_per_hour: Option<u32>,
    pub max_concurrent_jobs: Option<u32>,
    pub allowed_strategies: HashSet<Strategy>,
    pub notes: Option<String>,
}

impl DomainPolicy {
    /// A permissive default policy used when no explicit policy is on file:
    /// allowed, vanilla-only, no rate or concurrency caps.
    #[must_use]
    pub fn default_for_domain(domain: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            allowed: true,
            denied: false,
            rate_limit_per_minute: None,
            rate_limit_per_hour: None,
            max_concurrent_jobs: None,
            allowed_strategies: HashSet::from([Strategy::Vanilla]),
            notes: None,
        }
    }
}

/// Outcome of both the per-minute and per-hour rate-limit checks, computed
/// by the caller before invoking [`evaluate_admission`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitOutcome {
    pub minute_ok: bool,
    pub hour_ok: bool,
}

impl RateLimitOutcome {
    #[must_use]
    pub fn passed(self) -> bool {
        self.minute_ok && self.hour_ok
    }
}

/// Inputs to one admission decision.
pub struct AdmissionRequest<'a> {
    pub policy: Option<&'a DomainPolicy>,
    pub requested_strategy: Strategy,
    pub authorization_mode: AuthorizationMode,
    pub rate_limit: RateLimitOutcome,
    pub current_concurrency: u32,
}

/// Evaluate the six-step admission decision from §4.4.
///
/// A missing `policy` is treated as [`DomainPolicy::default_for_domain`]
/// would produce (allowed, vanilla-only, unlimited).
#[must_use]
pub fn evaluate_admission(req: &AdmissionRequest<'_>) -> (PolicyAction, String) {
    // Step 1: denied / not-allowed.
    if let Some(policy) = req.policy {
        if policy.denied || !policy.allowed {
            return (PolicyAction::Deny, format!("domain {} is denied", policy.domain));
        }
    }

    let allowed_strategies: HashSet<Strategy> = req
        .policy
        .map(|p| p.allowed_strategies.clone())
        .unwrap_or_else(|| HashSet::from([Strategy::Vanilla]));

    // Step 2: strategy not in the domain's allow-set.
    if !allowed_strategies.contains(&req.requested_strategy) {
        return (
            PolicyAction::StrategyRestricted,
            format!("strategy {:?} not permitted for this domain", req.requested_strategy),
        );
    }

    // Step 3: public callers may only request vanilla.
    if req.authorization_mode == AuthorizationMode::Public && req.requested_strategy != Strategy::Vanilla {
        return (
            PolicyAction::StrategyRestricted,
            "public authorization mode may only request the vanilla strategy".to_owned(),
        );
    }

    // Step 4: rate limit, minute then hour.
    if !req.rate_limit.passed() {
        return (PolicyAction::RateLimit, "rate limit exceeded".to_owned());
    }

    // Step 5: concurrency ceiling.
    if let Some(policy) = req.policy {
        if let Some(max) = policy.max_concurrent_jobs {
            if req.current_concurrency >= max {
                return (
                    PolicyAction::ConcurrencyLimit,
                    format!("domain concurrency at ceiling ({max})"),
                );
            }
        }
    }

    (PolicyAction::Allow, "admitted".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_policy() -> DomainPolicy {
        let mut p = DomainPolicy::default_for_domain("example.com");
        p.allowed_strategies = HashSet::from([Strategy::Vanilla]);
        p
    }

    fn passing_rate_limit() -> RateLimitOutcome {
        RateLimitOutcome { minute_ok: true, hour_ok: true }
    }

    #[test]
    fn scenario_1_strategy_restricted() {
        let policy = base_policy();
        let req = AdmissionRequest {
            policy: Some(&policy),
            requested_strategy: Strategy::Stealth,
            authorization_mode: AuthorizationMode::Public,
            rate_limit: passing_rate_limit(),
            current_concurrency: 0,
        };
        let (action, _) = evaluate_admission(&req);
        assert_eq!(action, PolicyAction::StrategyRestricted);
    }

    #[test]
    fn denied_policy_always_denies() {
        let mut policy = base_policy();
        policy.denied = true;
        let req = AdmissionRequest {
            policy: Some(&policy),
            requested_strategy: Strategy::Vanilla,
            authorization_mode: AuthorizationMode::Internal,
            rate_limit: passing_rate_limit(),
            current_concurrency: 0,
        };
        assert_eq!(evaluate_admission(&req).0, PolicyAction::Deny);
    }

    #[test]
    fn rate_limit_failure_short_circuits_concurrency_check() {
        let mut policy = base_policy();
        policy.max_concurrent_jobs = Some(1);
        let req = AdmissionRequest {
            policy: Some(&policy),
            requested_strategy: Strategy::Vanilla,
            authorization_mode: AuthorizationMode::Internal,
            rate_limit: RateLimitOutcome { minute_ok: false, hour_ok: true },
            current_concurrency: 0,
        };
        assert_eq!(evaluate_admission(&req).0, PolicyAction::RateLimit);
    }

    #[test]
    fn concurrency_ceiling_denies_at_limit() {
        let mut policy = base_policy();
        policy.max_concurrent_jobs = Some(2);
        let req = AdmissionRequest {
            policy: Some(&policy),
            requested_strategy: Strategy::Vanilla,
            authorization_mode: AuthorizationMode::Internal,
            rate_limit: passing_rate_limit(),
            current_concurrency: 2,
        };
        assert_eq!(evaluate_admission(&req).0, PolicyAction::ConcurrencyLimit);
    }

    #[test]
    fn missing_policy_defaults_to_vanilla_only_allow() {
        let req = AdmissionRequest {
            policy: None,
            requested_strategy: Strategy::Vanilla,
            authorization_mode: AuthorizationMode::Public,
            rate_limit: passing_rate_limit(),
            current_concurrency: 0,
        };
        assert_eq!(evaluate_admission(&req).0, PolicyAction::Allow);
    }
}
