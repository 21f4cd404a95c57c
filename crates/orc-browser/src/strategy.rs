//! Strategy Selector & Executors (C7, §4.7).
//!
//! The selector is a pure function of `payload.evasion_level` with a
//! domain-substring fallback (`orc_core::job::Strategy::from_evasion_level` /
//! `infer_from_domain`). Every strategy shares one pipeline — acquire page,
//! `before_navigation`, navigate, `after_navigation`, run the action routine,
//! release page — and differs only in its hooks, modeled as the capability
//! set `{before_navigation, after_navigation}` per strategy tag.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use orc_core::job::{Job, Strategy};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::{self, CookieCache};
use crate::artifacts::ArtifactCapturer;
use crate::error::ExecutorError;
use crate::pool::BrowserPool;

/// Viewport sizes the stealth/assault hooks pick from at random, matching
/// §4.7's "small realistic set".
const STEALTH_VIEWPORTS: [(u32, u32); 3] = [(1920, 1080), (1366, 768), (1536, 864)];

/// Select a strategy for `job` the way admission already did (the
/// orchestrator persists the resolved strategy on the job), but exposed here
/// too so the executor can be driven directly against a raw payload, e.g.
/// from a workflow that hasn't gone through admission yet.
#[must_use]
pub fn select_strategy(domain: &str, payload: &serde_json::Value) -> Strategy {
    payload
        .get("evasion_level")
        .and_then(serde_json::Value::as_u64)
        .map(|level| Strategy::from_evasion_level(level as u32))
        .unwrap_or_else(|| Strategy::infer_from_domain(domain))
}

#[async_trait]
trait StrategyHooks: Send + Sync {
    async fn before_navigation(&self, page: &Page) -> Result<(), ExecutorError>;
    async fn after_navigation(&self, page: &Page) -> Result<(), ExecutorError>;
}

struct VanillaHooks;

#[async_trait]
impl StrategyHooks for VanillaHooks {
    async fn before_navigation(&self, _page: &Page) -> Result<(), ExecutorError> {
        Ok(())
    }
    async fn after_navigation(&self, _page: &Page) -> Result<(), ExecutorError> {
        Ok(())
    }
}

struct StealthHooks;

async fn apply_stealth_delay_and_viewport(page: &Page) -> Result<(), ExecutorError> {
    let delay_ms = rand::thread_rng().gen_range(100..=300);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    let (width, height) = STEALTH_VIEWPORTS[rand::thread_rng().gen_range(0..STEALTH_VIEWPORTS.len())];
    page.execute(
        chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ExecutorError::Action)?,
    )
    .await?;
    Ok(())
}

#[async_trait]
impl StrategyHooks for StealthHooks {
    async fn before_navigation(&self, page: &Page) -> Result<(), ExecutorError> {
        apply_stealth_delay_and_viewport(page).await
    }
    async fn after_navigation(&self, _page: &Page) -> Result<(), ExecutorError> {
        Ok(())
    }
}

struct AssaultHooks;

const ASSAULT_EVASION_SCRIPT: &str = r#"
(() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  window.chrome = window.chrome || { runtime: {} };
  Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
  const originalQuery = window.navigator.permissions.query;
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: 'denied' })
      : originalQuery(parameters);
})();
"#;

#[async_trait]
impl StrategyHooks for AssaultHooks {
    async fn before_navigation(&self, page: &Page) -> Result<(), ExecutorError> {
        apply_stealth_delay_and_viewport(page).await?;
        page.evaluate_on_new_document(ASSAULT_EVASION_SCRIPT)
            .await
            .map_err(|e| ExecutorError::Action(format!("assault evasion injection failed: {e}")))?;
        Ok(())
    }
    async fn after_navigation(&self, _page: &Page) -> Result<(), ExecutorError> {
        Ok(())
    }
}

fn hooks_for(strategy: Strategy) -> Box<dyn StrategyHooks> {
    match strategy {
        Strategy::Vanilla => Box::new(VanillaHooks),
        Strategy::Stealth => Box::new(StealthHooks),
        Strategy::Assault => Box::new(AssaultHooks),
    }
}

/// Outcome of one executor run, handed back to the Job Orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub success: bool,
    pub duration_seconds: f64,
    pub error: Option<String>,
    pub details: serde_json::Value,
}

/// Run the full §4.7 pipeline for `job` against a page leased from `pool`.
///
/// Action-routine failures are caught and folded into
/// `ExecutionResult{success: false, error: Some(..)}`; transport failures
/// (pool exhaustion, navigation failure, page crash) propagate as `Err` so
/// the Orchestrator can classify them as retryable.
///
/// # Errors
///
/// Returns `Err(ExecutorError)` for failures outside the action routine
/// itself: acquiring a page, navigating, or running strategy hooks.
pub async fn execute(
    pool: &BrowserPool,
    job: &Job,
    navigation_timeout: Duration,
    cookies: &CookieCache,
    artifacts: &ArtifactCapturer,
) -> Result<ExecutionResult, ExecutorError> {
    let started = Instant::now();
    let leased = pool.acquire().await?;
    let page = leased.page();
    let hooks = hooks_for(job.strategy);

    hooks.before_navigation(page).await?;

    let timeout = job
        .payload
        .get("timeout_seconds")
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_secs)
        .unwrap_or(navigation_timeout);

    navigate(page, &job.url, timeout).await?;
    hooks.after_navigation(page).await?;

    let outcome = actions::run(job, page, cookies, artifacts).await;
    let duration_seconds = started.elapsed().as_secs_f64();

    match outcome {
        Ok(details) => {
            info!(job_id = %job.id, strategy = ?job.strategy, duration_seconds, "execution succeeded");
            Ok(ExecutionResult { job_id: job.id, success: true, duration_seconds, error: None, details })
        }
        Err(ExecutorError::Transport(e)) => Err(ExecutorError::Transport(e)),
        Err(ExecutorError::NavigationTimeout(d)) => Err(ExecutorError::NavigationTimeout(d)),
        Err(other) => {
            warn!(job_id = %job.id, error = %other, "execution action failed");
            Ok(ExecutionResult {
                job_id: job.id,
                success: false,
                duration_seconds,
                error: Some(other.to_string()),
                details: serde_json::Value::Null,
            })
        }
    }
}

async fn navigate(page: &Page, url: &str, timeout: Duration) -> Result<(), ExecutorError> {
    let goto = page.execute(NavigateParams::builder().url(url).build().map_err(ExecutorError::Navigation)?);
    tokio::time::timeout(timeout, goto).await.map_err(|_| ExecutorError::NavigationTimeout(timeout))?.map_err(|e| ExecutorError::Navigation(e.to_string()))?;
    tokio::time::timeout(timeout, page.wait_for_navigation()).await.map_err(|_| ExecutorError::NavigationTimeout(timeout))?.map_err(|e| ExecutorError::Navigation(e.to_string()))?;
    Ok(())
}
