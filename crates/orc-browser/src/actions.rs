//! Action routines run by the Strategy Executors (C7, §4.7) once a page has
//! navigated. Each routine reads its configuration out of `job.payload`,
//! performs its action against the leased page, and returns a JSON details
//! blob. Action-level failures are returned as `Err(ExecutorError::Action*)`
//! so the pipeline can fold them into `ExecutionResult{success: false}`
//! instead of propagating them as transport failures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::browser::SetDownloadBehaviorParams;
use chromiumoxide::cdp::browser_protocol::network::{EventRequestWillBeSent, EventResponseReceived};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use image::{Rgba, RgbaImage};
use orc_core::job::{Job, JobType};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::artifacts::{ArtifactCapturer, CaptureKind};
use crate::error::ExecutorError;

/// Best-effort in-memory cache of authenticated session cookies, keyed by
/// `domain:md5(credentials)` with a 24 h TTL — the optional session-reuse
/// optimisation the source leaves unmandated (only the per-call selector
/// path is normative).
pub struct CookieCache {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
    ttl: Duration,
}

impl Default for CookieCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600))
    }
}

impl CookieCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, inserted)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: String, cookies: Value) {
        self.entries.lock().await.insert(key, (cookies, Instant::now()));
    }

    #[must_use]
    pub fn session_key(domain: &str, username: &str, password: &str) -> String {
        use md5::{Digest as _, Md5};
        let digest = Md5::digest(format!("{username}:{password}").as_bytes());
        format!("{domain}:{:x}", digest)
    }
}

/// Dispatch to the action routine matching `job.job_type`.
///
/// # Errors
///
/// Returns an `ExecutorError` describing why the action failed. Callers
/// distinguish `ExecutorError::Transport` (propagate) from every other
/// variant (fold into `success=false`).
pub async fn run(job: &Job, page: &Page, cookies: &CookieCache, artifacts: &ArtifactCapturer) -> Result<Value, ExecutorError> {
    match job.job_type {
        JobType::NavigateExtract => navigate_extract(page, job.id, &job.payload, artifacts).await,
        JobType::Authenticate => authenticate(page, &job.domain, &job.payload, cookies).await,
        JobType::FormSubmit => form_submit(page, &job.payload).await,
        JobType::FileDownload => file_download(page, job.id, &job.payload, artifacts).await,
        JobType::ScreenshotCapture => screenshot_capture(page, job.id, &job.payload, artifacts).await,
        JobType::ScreenshotDiff => screenshot_diff(page, job.id, &job.payload, artifacts).await,
        JobType::ApiIntercept => api_intercept(page, job.id, &job.payload, artifacts).await,
    }
}

fn config<T: for<'de> Deserialize<'de>>(payload: &Value, field: &str) -> Result<T, ExecutorError> {
    let raw = payload.get(field).cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(|e| ExecutorError::InvalidPayload(format!("{field}: {e}")))
}

// ---------------------------------------------------------------- navigate_extract

#[derive(Debug, Deserialize)]
struct SelectorConfig {
    selector: String,
    #[serde(default = "default_attribute")]
    attribute: String,
    #[serde(default)]
    multiple: bool,
}

fn default_attribute() -> String {
    "text".to_string()
}

async fn extract_attribute(page: &Page, selector: &str, attribute: &str) -> Result<Option<String>, ExecutorError> {
    let Ok(element) = page.find_element(selector).await else { return Ok(None) };
    let value = if attribute == "text" {
        element.inner_text().await.map_err(|e| ExecutorError::Cdp(e.to_string()))?
    } else {
        element.attribute(attribute).await.map_err(|e| ExecutorError::Cdp(e.to_string()))?
    };
    Ok(value.map(|v| v.trim().to_string()))
}

async fn navigate_extract(page: &Page, job_id: Uuid, payload: &Value, artifacts: &ArtifactCapturer) -> Result<Value, ExecutorError> {
    let selectors: Vec<SelectorConfig> = config(payload, "selectors")?;
    let mut extracted = serde_json::Map::new();

    for cfg in selectors {
        if cfg.multiple {
            let elements = page.find_elements(&cfg.selector).await.unwrap_or_default();
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                let value = if cfg.attribute == "text" {
                    element.inner_text().await.ok().flatten()
                } else {
                    element.attribute(&cfg.attribute).await.ok().flatten()
                };
                values.push(Value::String(value.unwrap_or_default().trim().to_string()));
            }
            extracted.insert(cfg.selector.clone(), Value::Array(values));
        } else {
            let value = extract_attribute(page, &cfg.selector, &cfg.attribute).await?;
            extracted.insert(cfg.selector.clone(), value.map_or(Value::Null, Value::String));
        }
    }

    // Workflows built on navigate_extract (e.g. the uptime smoke check) can
    // ask for a viewport screenshot alongside the selector scrape without
    // needing a second job.
    if let Some(shot_cfg) = payload.get("screenshot") {
        let cfg: ScreenshotConfig = serde_json::from_value(shot_cfg.clone()).map_err(|e| ExecutorError::InvalidPayload(e.to_string()))?;
        if cfg.viewport || cfg.fullpage {
            let mut records = Vec::new();
            if cfg.viewport {
                let bytes = page.screenshot(ScreenshotParams::builder().full_page(false).build()).await?;
                records.push(artifacts.save_png(job_id, CaptureKind::ViewportPng, &bytes).await.map_err(|e| ExecutorError::Action(e.to_string()))?);
            }
            if cfg.fullpage {
                let bytes = page.screenshot(ScreenshotParams::builder().full_page(true).build()).await?;
                records.push(artifacts.save_png(job_id, CaptureKind::FullPagePng, &bytes).await.map_err(|e| ExecutorError::Action(e.to_string()))?);
            }
            extracted.insert("_screenshots".to_string(), serde_json::to_value(&records).unwrap_or(Value::Null));
        }
    }

    Ok(Value::Object(extracted))
}

// ---------------------------------------------------------------- authenticate

#[derive(Debug, Deserialize)]
struct AuthenticateConfig {
    #[serde(default = "default_username_selector")]
    username_selector: String,
    #[serde(default = "default_password_selector")]
    password_selector: String,
    #[serde(default = "default_submit_selector")]
    submit_selector: String,
    username: String,
    password: String,
    #[serde(default)]
    success_indicator: Option<String>,
}

fn default_username_selector() -> String {
    "input[type=email], input[name=username], input[name=email]".to_string()
}
fn default_password_selector() -> String {
    "input[type=password]".to_string()
}
fn default_submit_selector() -> String {
    "button[type=submit], input[type=submit]".to_string()
}

async fn authenticate(page: &Page, domain: &str, payload: &Value, cookies: &CookieCache) -> Result<Value, ExecutorError> {
    let cfg: AuthenticateConfig = config(payload, "auth")?;
    let session_key = CookieCache::session_key(domain, &cfg.username, &cfg.password);

    if let Some(cached) = cookies.get(&session_key).await {
        return Ok(json!({ "authenticated": true, "session_reused": true, "cookies": cached }));
    }

    let username_el = page
        .find_element(&cfg.username_selector)
        .await
        .map_err(|_| ExecutorError::RequiredSelectorMissing(cfg.username_selector.clone()))?;
    username_el.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    username_el.type_str(&cfg.username).await.map_err(|e| ExecutorError::Action(e.to_string()))?;

    let password_el = page
        .find_element(&cfg.password_selector)
        .await
        .map_err(|_| ExecutorError::RequiredSelectorMissing(cfg.password_selector.clone()))?;
    password_el.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    password_el.type_str(&cfg.password).await.map_err(|e| ExecutorError::Action(e.to_string()))?;

    let submit_el = page
        .find_element(&cfg.submit_selector)
        .await
        .map_err(|_| ExecutorError::RequiredSelectorMissing(cfg.submit_selector.clone()))?;
    submit_el.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;

    let _ = tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await;

    let mut success_confirmed = true;
    if let Some(indicator) = &cfg.success_indicator {
        success_confirmed = wait_for_selector(page, indicator, Duration::from_secs(5)).await;
        if !success_confirmed {
            return Err(ExecutorError::RequiredSelectorMissing(indicator.clone()));
        }
    }

    let raw_cookies = page.get_cookies().await.map_err(|e| ExecutorError::Cdp(e.to_string()))?;
    let cookies_value = serde_json::to_value(&raw_cookies).unwrap_or(Value::Null);
    cookies.put(session_key, cookies_value.clone()).await;

    Ok(json!({ "authenticated": success_confirmed, "session_reused": false, "cookies": cookies_value }))
}

async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ---------------------------------------------------------------- form_submit

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum FieldType {
    Text,
    Select,
    Checkbox,
}

impl Default for FieldType {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Deserialize)]
struct FormFieldConfig {
    selector: String,
    #[serde(default)]
    field_type: FieldType,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct FormSubmitConfig {
    fields: Vec<FormFieldConfig>,
    submit_selector: String,
    #[serde(default)]
    success_selector: Option<String>,
    #[serde(default)]
    error_selector: Option<String>,
    #[serde(default)]
    expected_text: Option<String>,
}

async fn form_submit(page: &Page, payload: &Value) -> Result<Value, ExecutorError> {
    let cfg: FormSubmitConfig = config(payload, "form")?;

    for field in &cfg.fields {
        let element = page
            .find_element(&field.selector)
            .await
            .map_err(|_| ExecutorError::RequiredSelectorMissing(field.selector.clone()))?;
        match field.field_type {
            FieldType::Text => {
                element.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;
                let text = field.value.as_str().unwrap_or_default();
                element.type_str(text).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
            }
            FieldType::Checkbox => {
                if field.value.as_bool().unwrap_or(false) {
                    element.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;
                }
            }
            FieldType::Select => {
                let option = field.value.as_str().unwrap_or_default();
                let script = format!(
                    "(() => {{ const el = document.querySelector({sel:?}); if (el) {{ el.value = {val:?}; el.dispatchEvent(new Event('change')); }} }})()",
                    sel = field.selector,
                    val = option,
                );
                page.evaluate(script).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
            }
        }
    }

    let submit_el = page
        .find_element(&cfg.submit_selector)
        .await
        .map_err(|_| ExecutorError::RequiredSelectorMissing(cfg.submit_selector.clone()))?;
    submit_el.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    let _ = tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await;

    let mut success = cfg.success_selector.is_none() && cfg.error_selector.is_none() && cfg.expected_text.is_none();
    if let Some(selector) = &cfg.success_selector {
        success = wait_for_selector(page, selector, Duration::from_secs(5)).await;
    }
    if let Some(selector) = &cfg.error_selector {
        if wait_for_selector(page, selector, Duration::from_millis(500)).await {
            success = false;
        }
    }
    let page_content = page.content().await.unwrap_or_default();
    if let Some(expected) = &cfg.expected_text {
        success = success && page_content.contains(expected.as_str());
    }

    Ok(json!({
        "success": success,
        "current_url": page.url().await.ok().flatten(),
    }))
}

// ---------------------------------------------------------------- file_download

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DownloadTrigger {
    Click,
    Link,
    Api,
}

#[derive(Debug, Deserialize)]
struct FileDownloadConfig {
    trigger: DownloadTrigger,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expected_sha256: Option<String>,
    #[serde(default)]
    min_size_bytes: Option<u64>,
    #[serde(default)]
    max_size_bytes: Option<u64>,
    #[serde(default)]
    compute_md5: bool,
}

async fn file_download(page: &Page, job_id: Uuid, payload: &Value, artifacts: &ArtifactCapturer) -> Result<Value, ExecutorError> {
    let cfg: FileDownloadConfig = config(payload, "download")?;
    let dir = artifacts.downloads_dir(job_id);
    tokio::fs::create_dir_all(&dir).await?;

    page.execute(
        SetDownloadBehaviorParams::builder()
            .behavior(chromiumoxide::cdp::browser_protocol::browser::DownloadBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(ExecutorError::Action)?,
    )
    .await
    .map_err(|e| ExecutorError::Cdp(e.to_string()))?;

    match cfg.trigger {
        DownloadTrigger::Click | DownloadTrigger::Link => {
            let selector = cfg.selector.as_deref().ok_or_else(|| ExecutorError::InvalidPayload("download.selector required for click/link trigger".into()))?;
            let element = page.find_element(selector).await.map_err(|_| ExecutorError::RequiredSelectorMissing(selector.to_string()))?;
            element.click().await.map_err(|e| ExecutorError::Action(e.to_string()))?;
        }
        DownloadTrigger::Api => {
            let url = cfg.url.as_deref().ok_or_else(|| ExecutorError::InvalidPayload("download.url required for api trigger".into()))?;
            let script = format!("fetch({url:?}).catch(() => {{}})");
            page.evaluate(script).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
        }
    }

    let path = wait_for_download(&dir, Duration::from_secs(30)).await.ok_or_else(|| ExecutorError::Action("download did not complete within timeout".into()))?;

    let bytes = tokio::fs::read(&path).await?;
    let size = bytes.len() as u64;
    if let Some(min) = cfg.min_size_bytes {
        if size < min {
            return Err(ExecutorError::Action(format!("downloaded file {size} bytes below minimum {min}")));
        }
    }
    if let Some(max) = cfg.max_size_bytes {
        if size > max {
            return Err(ExecutorError::Action(format!("downloaded file {size} bytes above maximum {max}")));
        }
    }

    let sha256 = hex::encode(Sha256::digest(&bytes));
    if let Some(expected) = &cfg.expected_sha256 {
        if &sha256 != expected {
            return Err(ExecutorError::Action(format!("sha256 mismatch: expected {expected}, got {sha256}")));
        }
    }
    let md5_hex = if cfg.compute_md5 {
        use md5::{Digest as _, Md5};
        Some(format!("{:x}", Md5::digest(&bytes)))
    } else {
        None
    };

    let mime = mime_guess_from_extension(&path);
    let meta = json!({
        "path": path,
        "size_bytes": size,
        "sha256": sha256,
        "md5": md5_hex,
        "mime_type": mime,
        "downloaded_at": chrono::Utc::now(),
    });
    let meta_path = path.with_extension(format!("{}.meta.json", path.extension().and_then(|e| e.to_str()).unwrap_or("")));
    tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).await?;

    Ok(meta)
}

async fn wait_for_download(dir: &std::path::Path, timeout: Duration) -> Option<PathBuf> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !name.ends_with(".crdownload") && !name.ends_with(".meta.json") {
                    return Some(entry.path());
                }
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn mime_guess_from_extension(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------- screenshot_capture

#[derive(Debug, Deserialize, Default)]
struct ScreenshotConfig {
    #[serde(default)]
    fullpage: bool,
    #[serde(default = "default_true")]
    viewport: bool,
}

fn default_true() -> bool {
    true
}

async fn screenshot_capture(page: &Page, job_id: Uuid, payload: &Value, artifacts: &ArtifactCapturer) -> Result<Value, ExecutorError> {
    let cfg: ScreenshotConfig = payload.get("screenshot").cloned().map_or_else(|| Ok(ScreenshotConfig::default()), |v| serde_json::from_value(v).map_err(|e| ExecutorError::InvalidPayload(e.to_string())))?;

    let mut records = Vec::new();
    if cfg.viewport {
        let bytes = page.screenshot(ScreenshotParams::builder().full_page(false).build()).await?;
        records.push(artifacts.save_png(job_id, CaptureKind::ViewportPng, &bytes).await.map_err(|e| ExecutorError::Action(e.to_string()))?);
    }
    if cfg.fullpage {
        let bytes = page.screenshot(ScreenshotParams::builder().full_page(true).build()).await?;
        records.push(artifacts.save_png(job_id, CaptureKind::FullPagePng, &bytes).await.map_err(|e| ExecutorError::Action(e.to_string()))?);
    }

    Ok(serde_json::to_value(&records).unwrap_or(Value::Null))
}

// ---------------------------------------------------------------- screenshot_diff

#[derive(Debug, Deserialize)]
struct ScreenshotDiffConfig {
    #[serde(default)]
    trigger_selector: Option<String>,
}

async fn screenshot_diff(page: &Page, job_id: Uuid, payload: &Value, artifacts: &ArtifactCapturer) -> Result<Value, ExecutorError> {
    let cfg: ScreenshotDiffConfig = config(payload, "screenshot_diff")?;

    let before = page.screenshot(ScreenshotParams::builder().full_page(false).build()).await?;

    if let Some(selector) = &cfg.trigger_selector {
        if let Ok(element) = page.find_element(selector).await {
            let _ = element.click().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    let after = page.screenshot(ScreenshotParams::builder().full_page(false).build()).await?;

    let (diff_png, highlight_png, heatmap_png, changed_ratio) =
        diff_images(&before, &after).map_err(|e| ExecutorError::Action(format!("image diff failed: {e}")))?;

    let before_record = artifacts.save_png(job_id, CaptureKind::ViewportPng, &before).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    let after_record = artifacts.save(job_id, CaptureKind::ViewportPng, &after).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    let diff_record = artifacts.save(job_id, CaptureKind::FullPagePng, &diff_png).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    let highlight_record = artifacts.save(job_id, CaptureKind::FullPagePng, &highlight_png).await.map_err(|e| ExecutorError::Action(e.to_string()))?;
    let heatmap_record = artifacts.save(job_id, CaptureKind::FullPagePng, &heatmap_png).await.map_err(|e| ExecutorError::Action(e.to_string()))?;

    Ok(json!({
        "changed": changed_ratio > 0.0,
        "changed_pixel_ratio": changed_ratio,
        "before": before_record,
        "after": after_record,
        "diff": diff_record,
        "highlight": highlight_record,
        "heatmap": heatmap_record,
    }))
}

/// Produces three distinct images from a before/after pair: a grayscale
/// `diff` (per-pixel delta magnitude), a `highlight` (the "after" frame with
/// changed regions overlaid in solid red), and a `heatmap` (changed regions
/// colored by delta intensity, unchanged regions transparent).
fn diff_images(before: &[u8], after: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>, f64), image::ImageError> {
    let before_img = image::load_from_memory(before)?.to_rgba8();
    let after_img = image::load_from_memory(after)?.to_rgba8();

    let width = before_img.width().min(after_img.width());
    let height = before_img.height().min(after_img.height());

    let mut diff = RgbaImage::new(width, height);
    let mut highlight = RgbaImage::new(width, height);
    let mut heatmap = RgbaImage::new(width, height);
    let mut changed_pixels: u64 = 0;

    for y in 0..height {
        for x in 0..width {
            let a = before_img.get_pixel(x, y);
            let b = after_img.get_pixel(x, y);
            let delta: u32 = a.0.iter().zip(b.0.iter()).map(|(p, q)| u32::from(p.abs_diff(*q))).sum();
            let intensity = (delta.min(255 * 4) * 255 / (255 * 4)) as u8;
            diff.put_pixel(x, y, Rgba([intensity, intensity, intensity, 255]));

            if delta > 30 {
                changed_pixels += 1;
                highlight.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                heatmap.put_pixel(x, y, Rgba([255, 255 - intensity, 0, 255]));
            } else {
                highlight.put_pixel(x, y, *b);
                heatmap.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
    }

    let ratio = f64::from(u32::try_from(changed_pixels).unwrap_or(u32::MAX)) / f64::from(width * height).max(1.0);

    let mut diff_bytes = Vec::new();
    image::DynamicImage::ImageRgba8(diff)
        .write_to(&mut std::io::Cursor::new(&mut diff_bytes), image::ImageOutputFormat::Png)?;
    let mut highlight_bytes = Vec::new();
    image::DynamicImage::ImageRgba8(highlight)
        .write_to(&mut std::io::Cursor::new(&mut highlight_bytes), image::ImageOutputFormat::Png)?;
    let mut heatmap_bytes = Vec::new();
    image::DynamicImage::ImageRgba8(heatmap)
        .write_to(&mut std::io::Cursor::new(&mut heatmap_bytes), image::ImageOutputFormat::Png)?;

    Ok((diff_bytes, highlight_bytes, heatmap_bytes, ratio))
}

// ---------------------------------------------------------------- api_intercept

#[derive(Debug, Deserialize, Default)]
struct ApiInterceptConfig {
    #[serde(default)]
    capture_duration_ms: Option<u64>,
}

async fn api_intercept(page: &Page, job_id: Uuid, payload: &Value, artifacts: &ArtifactCapturer) -> Result<Value, ExecutorError> {
    let cfg: ApiInterceptConfig = payload.get("api_intercept").cloned().map_or_else(|| Ok(ApiInterceptConfig::default()), |v| serde_json::from_value(v).map_err(|e| ExecutorError::InvalidPayload(e.to_string())))?;

    let mut requests = page.event_listener::<EventRequestWillBeSent>().await.map_err(|e| ExecutorError::Cdp(e.to_string()))?;
    let mut responses = page.event_listener::<EventResponseReceived>().await.map_err(|e| ExecutorError::Cdp(e.to_string()))?;

    page.reload().await.map_err(|e| ExecutorError::Navigation(e.to_string()))?;
    let _ = tokio::time::timeout(Duration::from_secs(15), page.wait_for_navigation()).await;

    let capture_window = Duration::from_millis(cfg.capture_duration_ms.unwrap_or(2_000));
    let mut request_entries: Vec<Value> = Vec::new();
    let mut response_entries: HashMap<String, Value> = HashMap::new();

    let deadline = tokio::time::sleep(capture_window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            Some(event) = requests.next() => {
                request_entries.push(json!({
                    "request_id": event.request_id.to_string(),
                    "url": event.request.url,
                    "method": event.request.method,
                    "headers": serde_json::to_value(&event.request.headers).unwrap_or(Value::Null),
                }));
            }
            Some(event) = responses.next() => {
                response_entries.insert(
                    event.request_id.to_string(),
                    json!({
                        "status": event.response.status,
                        "status_text": event.response.status_text,
                        "mime_type": event.response.mime_type,
                        "headers": serde_json::to_value(&event.response.headers).unwrap_or(Value::Null),
                    }),
                );
            }
        }
    }

    drop(requests);
    drop(responses);

    let entries: Vec<Value> = request_entries
        .into_iter()
        .map(|mut req| {
            let request_id = req.get("request_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let response = response_entries.remove(&request_id).unwrap_or(Value::Null);
            let obj = req.as_object_mut().expect("constructed as object above");
            obj.insert("response".to_string(), response);
            req
        })
        .collect();

    let har = json!({
        "log": {
            "version": "1.2",
            "creator": { "name": "orc-browser", "version": env!("CARGO_PKG_VERSION") },
            "entries": entries,
        }
    });

    let record = artifacts.save_har(job_id, &har).await.map_err(|e| ExecutorError::Action(e.to_string()))?;

    Ok(json!({ "entry_count": har["log"]["entries"].as_array().map(Vec::len).unwrap_or(0), "har": record }))
}
