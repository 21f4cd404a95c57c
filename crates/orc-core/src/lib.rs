//! Domain model, policy, safety primitives, and workflow templates for the
//! browser automation job orchestrator.
//!
//! This crate has no I/O dependencies of its own beyond reading environment
//! variables for credential resolution — every stateful primitive (rate
//! limiter, circuit breaker, idempotency engine) is expressed as a pure
//! decision function plus a storage trait, so the whole crate is unit
//! testable without Redis, Postgres, or a browser.

pub mod audit;
pub mod circuit_breaker;
pub mod crypto;
pub mod error;
pub mod idempotency;
pub mod job;
pub mod policy;
pub mod rate_limit;
pub mod vault;
pub mod workflow;

pub use audit::{AuditLogEntry, AuditRecord};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStore, CircuitSnapshot, CircuitState};
pub use crypto::VaultKey;
pub use idempotency::{AdmissionOutcome, IdempotencyStore};
pub use job::{AuthorizationMode, Job, JobStatus, JobType, NewJob, Priority, Strategy};
pub use policy::{AdmissionRequest, DomainPolicy, RateLimitOutcome};
pub use rate_limit::{RateLimitProfile, RateLimiterStore, RateWindow};
pub use vault::{CredentialSource, CredentialVault};
pub use workflow::{InputSchema, WorkflowTemplate};
