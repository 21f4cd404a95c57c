//! Artifact Capturer (C8, §4.8).
//!
//! Captures any subset of `{fullpage png, viewport png, HAR JSON, console
//! JSON, DOM HTML, cookies JSON, local/session storage JSON}`, writes each
//! under `<artifacts_root>/<job_id>/<timestamp>_<kind>.<ext>` (downloads live
//! under a `downloads/` subdirectory instead, per §6.5), records a SHA-256
//! per artifact, and best-effort-updates a `latest_<kind>.<ext>` alias.
//!
//! Every capture is independent: a failure in one kind is recorded as an
//! error string for that kind and never fails the job, matching §4.8's
//! "best-effort" guarantee.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::page::{Page, ScreenshotParams};
use chrono::Utc;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ArtifactError;

/// How long an on-demand console capture listens before giving up. Console
/// messages emitted before this capture was requested are not retroactively
/// available — only a listener installed for the job's full lifetime could
/// see those, which this on-demand capture does not attempt.
const CONSOLE_CAPTURE_WINDOW: Duration = Duration::from_millis(750);

/// One named artifact request, resolved against a leased page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    FullPagePng,
    ViewportPng,
    HarJson,
    ConsoleJson,
    DomHtml,
    CookiesJson,
    StorageJson,
}

impl CaptureKind {
    fn slug(self) -> &'static str {
        match self {
            Self::FullPagePng => "fullpage",
            Self::ViewportPng => "viewport",
            Self::HarJson => "har",
            Self::ConsoleJson => "console",
            Self::DomHtml => "dom",
            Self::CookiesJson => "cookies",
            Self::StorageJson => "storage",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::FullPagePng | Self::ViewportPng => "png",
            Self::HarJson | Self::ConsoleJson | Self::CookiesJson | Self::StorageJson => "json",
            Self::DomHtml => "html",
        }
    }
}

/// A successfully written artifact.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArtifactRecord {
    pub kind: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Outcome of one requested capture — either a written record or the error
/// that kind hit, per §4.8's best-effort contract.
pub type CaptureOutcome = Result<ArtifactRecord, String>;

/// Writes artifacts for jobs under a shared root directory.
#[derive(Clone)]
pub struct ArtifactCapturer {
    root: PathBuf,
}

impl ArtifactCapturer {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    #[must_use]
    pub fn downloads_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join("downloads")
    }

    /// Write one artifact's raw bytes under the job's directory, recording
    /// its SHA-256 and best-effort-refreshing a `latest_<kind>.<ext>` alias.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the directory can't be created or the
    /// file can't be written.
    pub async fn save(&self, job_id: Uuid, kind: CaptureKind, bytes: &[u8]) -> Result<ArtifactRecord, ArtifactError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let filename = format!("{timestamp}_{}.{}", kind.slug(), kind.extension());
        let path = dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        let sha256 = hex::encode(Sha256::digest(bytes));

        let alias = dir.join(format!("latest_{}.{}", kind.slug(), kind.extension()));
        if let Err(err) = tokio::fs::copy(&path, &alias).await {
            tracing::debug!(%err, job_id = %job_id, kind = kind.slug(), "failed to refresh latest alias");
        }

        Ok(ArtifactRecord { kind: kind.slug().to_string(), path, sha256, size_bytes: bytes.len() as u64 })
    }

    async fn save_json(&self, job_id: Uuid, kind: CaptureKind, value: &serde_json::Value) -> Result<ArtifactRecord, ArtifactError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.save(job_id, kind, &bytes).await
    }

    /// Install a `Runtime.consoleAPICalled` listener and collect whatever
    /// console output the page produces within [`CONSOLE_CAPTURE_WINDOW`],
    /// mirroring the request/response event-listener pattern `api_intercept`
    /// uses for HAR capture.
    async fn capture_console(&self, page: &Page, job_id: Uuid) -> Result<ArtifactRecord, ArtifactError> {
        let mut events = page.event_listener::<EventConsoleApiCalled>().await?;

        let mut entries = Vec::new();
        let deadline = tokio::time::sleep(CONSOLE_CAPTURE_WINDOW);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => break,
                Some(event) = events.next() => {
                    entries.push(serde_json::to_value(event.as_ref()).unwrap_or(serde_json::Value::Null));
                }
            }
        }
        drop(events);

        self.save_json(job_id, CaptureKind::ConsoleJson, &serde_json::Value::Array(entries)).await
    }

    /// Run every requested capture against `page`, returning one outcome per
    /// kind. Failures are caught per-kind — this function itself never
    /// errors.
    pub async fn capture_all(&self, page: &Page, job_id: Uuid, kinds: &[CaptureKind]) -> Vec<(CaptureKind, CaptureOutcome)> {
        let mut results = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let outcome = self.capture_one(page, job_id, kind).await.map_err(|e| e.to_string());
            results.push((kind, outcome));
        }
        results
    }

    async fn capture_one(&self, page: &Page, job_id: Uuid, kind: CaptureKind) -> Result<ArtifactRecord, ArtifactError> {
        match kind {
            CaptureKind::FullPagePng => {
                let params = ScreenshotParams::builder().full_page(true).build();
                let bytes = page.screenshot(params).await?;
                self.save(job_id, kind, &bytes).await
            }
            CaptureKind::ViewportPng => {
                let params = ScreenshotParams::builder().full_page(false).build();
                let bytes = page.screenshot(params).await?;
                self.save(job_id, kind, &bytes).await
            }
            CaptureKind::DomHtml => {
                let html = page.content().await?;
                self.save(job_id, kind, html.as_bytes()).await
            }
            CaptureKind::CookiesJson => {
                let cookies = page.get_cookies().await?;
                let value = serde_json::to_value(cookies)?;
                self.save_json(job_id, kind, &value).await
            }
            CaptureKind::StorageJson => {
                let local: serde_json::Value = page
                    .evaluate("JSON.stringify(window.localStorage)")
                    .await?
                    .into_value()
                    .unwrap_or(serde_json::Value::Null);
                let session: serde_json::Value = page
                    .evaluate("JSON.stringify(window.sessionStorage)")
                    .await?
                    .into_value()
                    .unwrap_or(serde_json::Value::Null);
                let value = serde_json::json!({ "local_storage": local, "session_storage": session });
                self.save_json(job_id, kind, &value).await
            }
            CaptureKind::ConsoleJson => self.capture_console(page, job_id).await,
            CaptureKind::HarJson => {
                // HAR capture requires request/response listeners installed
                // before navigation — produced by the `api_intercept` action
                // routine itself, not an on-demand capture.
                self.save_json(job_id, kind, &serde_json::json!({"log": {"version": "1.2", "entries": []}})).await
            }
        }
    }
}

/// Write a pre-built HAR 1.2 document (produced by the `api_intercept`
/// action routine, which owns the request/response listeners) or a
/// collected console log.
impl ArtifactCapturer {
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the artifact can't be written.
    pub async fn save_har(&self, job_id: Uuid, har: &serde_json::Value) -> Result<ArtifactRecord, ArtifactError> {
        self.save_json(job_id, CaptureKind::HarJson, har).await
    }

    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the artifact can't be written.
    pub async fn save_console_log(&self, job_id: Uuid, entries: &serde_json::Value) -> Result<ArtifactRecord, ArtifactError> {
        self.save_json(job_id, CaptureKind::ConsoleJson, entries).await
    }

    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the artifact can't be written.
    pub async fn save_png(&self, job_id: Uuid, kind: CaptureKind, bytes: &[u8]) -> Result<ArtifactRecord, ArtifactError> {
        self.save(job_id, kind, bytes).await
    }
}
