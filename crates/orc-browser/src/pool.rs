//! Browser Pool (C6, §4.6).
//!
//! A bounded set of headless-browser instances, each hosting up to
//! `max_pages_per_instance` reusable pages plus one active page. Mirrors the
//! `BrowserSession`/`BrowserSessionManager` shape from the pack's headless-CDP
//! examples: one handler task per launched browser draining CDP events, an
//! RAII [`LeasedPage`] guard that returns its page on drop, and a
//! background idle-sweeper.
//!
//! Lock scope is limited to bookkeeping — selecting or reserving an instance
//! happens under the mutex, but launching a browser, opening a page, or
//! closing either happens after the lock is dropped, so one slow launch
//! never blocks an unrelated acquire/release.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PoolError;

/// Tunables for the pool. Defaults match §4.6's stated defaults where given;
/// `max_instances` and `max_pages_per_instance` are deployment-sized and have
/// no spec-mandated default, so they're set to values suitable for a single
/// worker-pool host.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_instances: usize,
    pub min_instances: usize,
    pub max_pages_per_instance: usize,
    pub idle_ttl: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 10,
            min_instances: 5,
            max_pages_per_instance: 4,
            idle_ttl: Duration::from_secs(300),
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: None,
        }
    }
}

struct Instance {
    id: Uuid,
    browser: Browser,
    handler_task: JoinHandle<()>,
    spare_pages: Vec<Page>,
    in_use: bool,
    idle_since: Option<Instant>,
}

struct PoolState {
    instances: Vec<Instance>,
    reserved: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Bounded pool of headless-browser instances. Cheap to clone — internally
/// an `Arc`.
#[derive(Clone)]
pub struct BrowserPool {
    inner: Arc<PoolInner>,
}

/// A page leased from the pool for the duration of one job. Returns itself
/// to the pool (or closes, if the instance is at its page ceiling) when
/// dropped, so callers never need a matching `release` call on the happy
/// path or on an early `?` return.
pub struct LeasedPage {
    page: Option<Page>,
    instance_id: Uuid,
    pool: Weak<PoolInner>,
}

impl LeasedPage {
    #[must_use]
    pub fn page(&self) -> &Page {
        self.page.as_ref().expect("page taken exactly once, at drop")
    }
}

impl Drop for LeasedPage {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else { return };
        let Some(inner) = self.pool.upgrade() else { return };
        let instance_id = self.instance_id;
        tokio::spawn(async move {
            release_page(&inner, instance_id, page).await;
        });
    }
}

impl BrowserPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            state: Mutex::new(PoolState { instances: Vec::new(), reserved: 0 }),
        });
        spawn_idle_sweeper(Arc::downgrade(&inner));
        Self { inner }
    }

    /// Acquire a leased page per the §4.6 acquire algorithm: reuse a spare
    /// page on an idle instance, else launch a new instance if under the
    /// ceiling, else fail with [`PoolError::Exhausted`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] if every instance is in use and the
    /// pool is already at `max_instances`, or [`PoolError::Launch`] /
    /// [`PoolError::NewPage`] if the underlying CDP calls fail.
    pub async fn acquire(&self) -> Result<LeasedPage, PoolError> {
        enum Plan {
            ReusePage(Uuid, Page),
            NewPageOn(Uuid, Browser),
            Launch,
        }

        let plan = {
            let mut state = self.inner.state.lock().await;
            if let Some(inst) = state.instances.iter_mut().find(|i| !i.in_use) {
                inst.in_use = true;
                inst.idle_since = None;
                if let Some(page) = inst.spare_pages.pop() {
                    Plan::ReusePage(inst.id, page)
                } else {
                    Plan::NewPageOn(inst.id, inst.browser.clone())
                }
            } else if state.instances.len() + state.reserved < self.inner.config.max_instances {
                state.reserved += 1;
                Plan::Launch
            } else {
                return Err(PoolError::Exhausted {
                    instances: state.instances.len(),
                    max_instances: self.inner.config.max_instances,
                });
            }
        };

        match plan {
            Plan::ReusePage(id, page) => Ok(LeasedPage { page: Some(page), instance_id: id, pool: Arc::downgrade(&self.inner) }),
            Plan::NewPageOn(id, browser) => {
                let page = browser.new_page("about:blank").await.map_err(|e| PoolError::NewPage(e.to_string()))?;
                Ok(LeasedPage { page: Some(page), instance_id: id, pool: Arc::downgrade(&self.inner) })
            }
            Plan::Launch => match self.launch_instance().await {
                Ok((id, page)) => Ok(LeasedPage { page: Some(page), instance_id: id, pool: Arc::downgrade(&self.inner) }),
                Err(err) => {
                    let mut state = self.inner.state.lock().await;
                    state.reserved = state.reserved.saturating_sub(1);
                    Err(err)
                }
            },
        }
    }

    async fn launch_instance(&self) -> Result<(Uuid, Page), PoolError> {
        let cfg = &self.inner.config;
        let user_data_dir = std::env::temp_dir().join(format!("orc-chrome-{}", Uuid::new_v4()));
        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .user_data_dir(user_data_dir)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: cfg.viewport_width,
                height: cfg.viewport_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });
        if let Some(ua) = &cfg.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }
        let config = builder.build().map_err(PoolError::Launch)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| PoolError::Launch(e.to_string()))?;
        let id = Uuid::new_v4();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler event error");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(|e| PoolError::NewPage(e.to_string()))?;

        let mut state = self.inner.state.lock().await;
        state.reserved = state.reserved.saturating_sub(1);
        state.instances.push(Instance { id, browser, handler_task, spare_pages: Vec::new(), in_use: true, idle_since: None });
        info!(instance_id = %id, total = state.instances.len(), "launched browser instance");
        Ok((id, page))
    }

    /// Open `about:blank` on one instance with a short deadline, to confirm
    /// the pool can still serve work. Returns `false` (never errors) on any
    /// failure, matching the "best-effort health probe" shape used
    /// throughout the safety layer.
    pub async fn health_check(&self) -> bool {
        let browser = {
            let state = self.inner.state.lock().await;
            state.instances.first().map(|i| i.browser.clone())
        };
        let Some(browser) = browser else { return true };
        let probe = async {
            browser.new_page("about:blank").await?.close().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        tokio::time::timeout(Duration::from_secs(5), probe).await.map(|r| r.is_ok()).unwrap_or(false)
    }

    /// Close every instance in deterministic (insertion) order. Called once
    /// during shutdown.
    pub async fn shutdown(&self) {
        let instances = {
            let mut state = self.inner.state.lock().await;
            std::mem::take(&mut state.instances)
        };
        for inst in instances {
            close_instance(inst).await;
        }
    }

    /// Number of instances currently live, for the operator status endpoint.
    pub async fn instance_count(&self) -> usize {
        self.inner.state.lock().await.instances.len()
    }
}

async fn release_page(inner: &Arc<PoolInner>, instance_id: Uuid, page: Page) {
    enum Outcome {
        Kept,
        Overflow(Page),
    }

    let outcome = {
        let mut state = inner.state.lock().await;
        match state.instances.iter_mut().find(|i| i.id == instance_id) {
            Some(inst) if inst.spare_pages.len() < inner.config.max_pages_per_instance => {
                inst.spare_pages.push(page);
                inst.in_use = false;
                inst.idle_since = Some(Instant::now());
                Outcome::Kept
            }
            Some(inst) => {
                inst.in_use = false;
                inst.idle_since = Some(Instant::now());
                Outcome::Overflow(page)
            }
            None => {
                warn!(%instance_id, "released page for unknown instance");
                Outcome::Overflow(page)
            }
        }
    };

    if let Outcome::Overflow(page) = outcome {
        if let Err(err) = page.close().await {
            debug!(error = %err, "failed closing overflow page");
        }
    }

    sweep_idle_instances(inner).await;
}

async fn sweep_idle_instances(inner: &Arc<PoolInner>) {
    let to_close = {
        let mut state = inner.state.lock().await;
        let min_instances = inner.config.min_instances;
        let idle_ttl = inner.config.idle_ttl;
        let total = state.instances.len();
        let mut closing = Vec::new();
        let mut keep = Vec::with_capacity(total);

        for inst in std::mem::take(&mut state.instances) {
            let idle_too_long = inst.idle_since.is_some_and(|t| t.elapsed() > idle_ttl);
            let still_above_floor = total - closing.len() - 1 >= min_instances;
            if !inst.in_use && idle_too_long && still_above_floor {
                closing.push(inst);
            } else {
                keep.push(inst);
            }
        }
        state.instances = keep;
        closing
    };
    for inst in to_close {
        info!(instance_id = %inst.id, "evicting idle browser instance");
        close_instance(inst).await;
    }
}

async fn close_instance(mut inst: Instance) {
    inst.handler_task.abort();
    for page in inst.spare_pages.drain(..) {
        if let Err(err) = page.close().await {
            debug!(error = %err, "failed closing spare page during teardown");
        }
    }
    if let Err(err) = inst.browser.close().await {
        debug!(error = %err, "failed closing browser instance");
    }
}

fn spawn_idle_sweeper(weak: Weak<PoolInner>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        loop {
            tick.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            sweep_idle_instances(&inner).await;
        }
    });
}

/// Snapshot of pool occupancy for the operator status endpoint (§4.13).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub instances: usize,
    pub in_use: usize,
    pub spare_pages: usize,
}

impl BrowserPool {
    pub async fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        let in_use = state.instances.iter().filter(|i| i.in_use).count();
        let spare_pages = state.instances.iter().map(|i| i.spare_pages.len()).sum();
        PoolStats { instances: state.instances.len(), in_use, spare_pages }
    }
}
