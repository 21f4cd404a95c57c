//! Headless-browser pool, evasion-strategy executors, and artifact capture
//! for the browser automation orchestrator.
//!
//! This crate owns everything downstream of a dispatched job: leasing a page
//! from a bounded pool ([`pool`]), running the right before/after-navigation
//! hooks and action routine for the job's strategy ([`strategy`],
//! [`actions`]), and writing captured evidence to disk ([`artifacts`]).

pub mod actions;
pub mod artifacts;
pub mod error;
pub mod pool;
pub mod strategy;

pub use actions::CookieCache;
pub use artifacts::{ArtifactCapturer, ArtifactRecord, CaptureKind};
pub use error::{ArtifactError, ExecutorError, PoolError};
pub use pool::{BrowserPool, LeasedPage, PoolConfig, PoolStats};
pub use strategy::{execute, select_strategy, ExecutionResult};
