//! Error types for `orc-core`.
//!
//! Mirrors the per-domain error enum style of the rest of this workspace —
//! each module gets its own enum, composed with `#[from]` where one module's
//! operation can fail because a lower one did.

/// Errors from credential vault resolution.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No credential was found and placeholders are not allowed in this mode.
    #[error("no credential for {domain}:{credential_type} and placeholders are disallowed in {mode} mode")]
    NotFoundPlaceholderDisallowed { domain: String, credential_type: String, mode: String },

    /// An `enc:`-prefixed value could not be decrypted.
    #[error("failed to decrypt credential: {reason}")]
    Decryption { reason: String },

    /// Encryption of a credential for storage failed.
    #[error("failed to encrypt credential: {reason}")]
    Encryption { reason: String },

    /// Vault has no encryption key configured but an `enc:` value was seen.
    #[error("encrypted credential present but no vault key configured")]
    NoKeyConfigured,
}

/// Errors surfaced by the credential vault's keystore seam.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("keystore unreachable: {0}")]
    StoreUnavailable(String),
}

/// Decision kinds a policy evaluation can produce. Mirrors §4.4 step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Allow,
    Deny,
    StrategyRestricted,
    RateLimit,
    ConcurrencyLimit,
}

impl PolicyAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::StrategyRestricted => "strategy_restricted",
            Self::RateLimit => "rate_limit",
            Self::ConcurrencyLimit => "concurrency_limit",
        }
    }
}

/// A non-`Allow` policy decision, returned to the caller as a 403.
#[derive(Debug, thiserror::Error)]
#[error("policy violation: {action} — {reason}")]
pub struct PolicyViolation {
    pub action: PolicyAction,
    pub reason: String,
}

impl PolicyViolation {
    #[must_use]
    pub fn new(action: PolicyAction, reason: impl Into<String>) -> Self {
        Self { action, reason: reason.into() }
    }
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the rate limiter's storage seam.
#[derive(Debug, thiserror::Error)]
pub enum RateLimiterError {
    /// The shared store (Redis) is unreachable. Callers fail OPEN on this.
    #[error("rate limiter store unreachable: {0}")]
    StoreUnavailable(String),
}

/// Errors surfaced by the circuit breaker's storage seam.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker store unreachable: {0}")]
    StoreUnavailable(String),
}

/// Errors surfaced by the idempotency engine's storage seam.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("idempotency store unreachable: {0}")]
    StoreUnavailable(String),
}

/// Errors from workflow template expansion / validation.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("unknown workflow template: {0}")]
    UnknownTemplate(String),

    #[error("missing required input field: {0}")]
    MissingField(String),

    #[error("invalid input for field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}
