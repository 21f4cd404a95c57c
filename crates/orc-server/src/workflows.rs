//! Workflow Executor (C11, §4.11).
//!
//! Binds the three built-in templates in [`orc_core::workflow`] to exactly
//! one job each. The workflow name and the caller's raw input are carried
//! inline on `job.payload` (under `__workflow_name`/`__workflow_input`)
//! rather than in a separate pending-runs table, so a restart never loses
//! track of which dispatched jobs need post-processing.

use std::collections::HashMap;
use std::time::Duration;

use orc_core::job::{AuthorizationMode, Job, JobType, NewJob, Priority, Strategy};
use orc_core::workflow::{self, WorkflowTemplate};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::AppError;
use crate::orchestrator;
use crate::state::AppState;

const WORKFLOW_NAME_KEY: &str = "__workflow_name";
const WORKFLOW_INPUT_KEY: &str = "__workflow_input";
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Summary row for `GET /api/v1/workflows`.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

impl From<&WorkflowTemplate> for WorkflowSummary {
    fn from(t: &WorkflowTemplate) -> Self {
        Self { name: t.name, display_name: t.display_name, description: t.description }
    }
}

/// List every registered workflow template.
#[must_use]
pub fn list_workflows() -> Vec<WorkflowSummary> {
    let mut templates: Vec<WorkflowTemplate> = workflow::registry().into_values().collect();
    templates.sort_by_key(|t| t.name);
    templates.iter().map(WorkflowSummary::from).collect()
}

/// Fetch one workflow's full definition.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if no template is registered under `name`.
pub fn get_workflow(name: &str) -> Result<WorkflowTemplate, AppError> {
    workflow::lookup(name).map_err(Into::into)
}

fn selector_list(input: &HashMap<String, Value>, field: &str, multiple: bool) -> Result<Value, AppError> {
    let raw = input
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation(format!("`{field}` must be an array of selectors")))?;

    let entries: Vec<Value> = raw
        .iter()
        .filter_map(Value::as_str)
        .map(|s| json!({ "selector": s, "attribute": "text", "multiple": multiple }))
        .collect();
    Ok(Value::Array(entries))
}

fn build_payload(template: &WorkflowTemplate, input: &HashMap<String, Value>) -> Result<Value, AppError> {
    match template.name {
        "page_change_detection" => {
            let selectors = selector_list(input, "selectors", false)?;
            Ok(json!({ "selectors": selectors }))
        }
        "job_posting_monitor" => {
            let fields = input
                .get("extract_fields")
                .and_then(Value::as_object)
                .ok_or_else(|| AppError::Validation("`extract_fields` must be an object of field -> selector".to_owned()))?;
            let selectors: Vec<Value> = fields
                .values()
                .filter_map(Value::as_str)
                .map(|s| json!({ "selector": s, "attribute": "text", "multiple": true }))
                .collect();
            Ok(json!({ "selectors": selectors }))
        }
        "uptime_smoke_check" => {
            let selectors = selector_list(input, "required_selectors", false)?;
            let mut payload = json!({ "selectors": selectors });
            if input.get("screenshot").and_then(Value::as_bool).unwrap_or(false) {
                payload["screenshot"] = json!({ "viewport": true, "fullpage": false });
            }
            Ok(payload)
        }
        other => Err(AppError::Validation(format!("no payload builder registered for workflow {other}"))),
    }
}

/// Validate input, build the backing job, and admit it.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for an unknown workflow, [`AppError::Validation`]
/// for missing/malformed input, or whatever [`orchestrator::admit_job`] returns.
pub async fn run_workflow(state: &AppState, name: &str, input: HashMap<String, Value>) -> Result<Job, AppError> {
    let template = workflow::lookup(name)?;
    workflow::validate_input(&template.input_schema, &input)?;

    let domain = input.get("domain").and_then(Value::as_str).ok_or_else(|| AppError::Validation("`domain` must be a string".to_owned()))?.to_owned();
    let url = input.get("url").and_then(Value::as_str).ok_or_else(|| AppError::Validation("`url` must be a string".to_owned()))?.to_owned();

    let strategy = input
        .get("strategy")
        .and_then(Value::as_str)
        .map(|s| serde_json::from_value::<Strategy>(json!(s)).map_err(|_| AppError::Validation(format!("unknown strategy {s}"))))
        .transpose()?
        .unwrap_or(template.default_strategy);

    let mut payload = build_payload(&template, &input)?;
    payload[WORKFLOW_NAME_KEY] = json!(template.name);
    payload[WORKFLOW_INPUT_KEY] = json!(input);

    let new_job = NewJob {
        domain,
        url,
        job_type: JobType::NavigateExtract,
        strategy,
        priority: Priority::Normal,
        payload,
        idempotency_key: None,
        timeout_seconds: state.config.default_job_timeout_seconds,
        authorization_mode: AuthorizationMode::Internal,
    };

    orchestrator::admit_job(state, new_job).await
}

/// If `job` was created by a workflow run, interpret the executor's output
/// and deliver a webhook when the workflow's own business rule fires.
/// Always non-fatal: a webhook delivery failure is logged, never propagated
/// into the job's own status.
pub async fn post_process_if_workflow(
    state: &AppState,
    job: &mut Job,
    result: &orc_browser::ExecutionResult,
) -> Result<(), AppError> {
    let Some(workflow_name) = job.payload.get(WORKFLOW_NAME_KEY).and_then(Value::as_str).map(ToOwned::to_owned) else {
        return Ok(());
    };
    let input: HashMap<String, Value> = job
        .payload
        .get(WORKFLOW_INPUT_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let output = match workflow_name.as_str() {
        "page_change_detection" => process_page_change_detection(state, job, &result.details, &input).await,
        "job_posting_monitor" => process_job_posting_monitor(state, job, &result.details, &input).await,
        "uptime_smoke_check" => process_uptime_smoke_check(state, job, &result.details, result.duration_seconds, &input).await,
        other => {
            warn!(job_id = %job.id, workflow = other, "post-processing skipped: no handler for this workflow");
            return Ok(());
        }
    };

    if let Value::Object(map) = job.result.get_or_insert_with(|| json!({})) {
        map.insert("workflow_output".to_owned(), output);
    }
    if let Err(e) = state.storage.update_job(job).await {
        warn!(job_id = %job.id, error = %e, "failed to persist workflow post-processing output");
    }
    Ok(())
}

fn hash_content(value: &Value) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

async fn process_page_change_detection(state: &AppState, job: &Job, details: &Value, input: &HashMap<String, Value>) -> Value {
    let current_hash = hash_content(details);
    let baseline_hash = input.get("baseline_content").map(hash_content);
    let changed = baseline_hash.as_deref().is_some_and(|b| b != current_hash);
    let alert_on_change = input.get("alert_on_change").and_then(Value::as_bool).unwrap_or(true);

    let mut alert_sent = false;
    if changed && alert_on_change {
        if let Some(webhook_url) = input.get("webhook_url").and_then(Value::as_str) {
            let body = json!({
                "workflow": "page_change_detection",
                "job_id": job.id,
                "domain": job.domain,
                "url": job.url,
                "content_hash": current_hash,
                "changed": true,
            });
            alert_sent = deliver_webhook(state, webhook_url, body).await;
        }
    }

    json!({ "content_hash": current_hash, "changed": changed, "alert_sent": alert_sent })
}

async fn process_job_posting_monitor(state: &AppState, job: &Job, details: &Value, input: &HashMap<String, Value>) -> Value {
    let fields = input.get("extract_fields").and_then(Value::as_object).cloned().unwrap_or_default();
    let keywords: Vec<String> =
        input.get("filter_keywords").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_lowercase).collect()).unwrap_or_default();

    let count = fields
        .values()
        .filter_map(|selector| selector.as_str())
        .filter_map(|selector| details.get(selector).and_then(Value::as_array))
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    let mut postings = Vec::with_capacity(count);
    for i in 0..count {
        let mut posting = serde_json::Map::new();
        for (field_name, selector) in &fields {
            let Some(selector) = selector.as_str() else { continue };
            let value = details.get(selector).and_then(Value::as_array).and_then(|a| a.get(i)).cloned().unwrap_or(Value::Null);
            posting.insert(field_name.clone(), value);
        }
        let matches_keyword = keywords.is_empty()
            || posting.values().any(|v| v.as_str().is_some_and(|s| keywords.iter().any(|k| s.to_lowercase().contains(k))));
        if matches_keyword {
            postings.push(Value::Object(posting));
        }
    }

    let alert_on_new = input.get("alert_on_new").and_then(Value::as_bool).unwrap_or(true);
    let mut alert_sent = false;
    if alert_on_new && !postings.is_empty() {
        if let Some(webhook_url) = input.get("webhook_url").and_then(Value::as_str) {
            let body = json!({
                "workflow": "job_posting_monitor",
                "job_id": job.id,
                "domain": job.domain,
                "postings": postings.iter().take(10).collect::<Vec<_>>(),
            });
            alert_sent = deliver_webhook(state, webhook_url, body).await;
        }
    }

    json!({ "posting_count": postings.len(), "postings": postings, "alert_sent": alert_sent })
}

async fn process_uptime_smoke_check(
    state: &AppState,
    job: &Job,
    details: &Value,
    duration_seconds: f64,
    input: &HashMap<String, Value>,
) -> Value {
    let required: Vec<String> =
        input.get("required_selectors").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect()).unwrap_or_default();
    let missing: Vec<String> = required.into_iter().filter(|s| details.get(s).map(Value::is_null).unwrap_or(true)).collect();

    let verify_load_time = input.get("verify_load_time").and_then(Value::as_bool).unwrap_or(false);
    let max_load_time_ms = input.get("max_load_time_ms").and_then(Value::as_u64).unwrap_or(5000);
    let load_time_ms = (duration_seconds * 1000.0) as u64;
    let load_time_ok = !verify_load_time || load_time_ms <= max_load_time_ms;

    let healthy = missing.is_empty() && load_time_ok;

    let mut alert_sent = false;
    if !healthy {
        if let Some(webhook_url) = input.get("webhook_url").and_then(Value::as_str) {
            let body = json!({
                "workflow": "uptime_smoke_check",
                "job_id": job.id,
                "domain": job.domain,
                "url": job.url,
                "healthy": false,
                "missing_selectors": missing,
                "load_time_ms": load_time_ms,
            });
            alert_sent = deliver_webhook(state, webhook_url, body).await;
        }
    }

    json!({ "healthy": healthy, "missing_selectors": missing, "load_time_ms": load_time_ms, "alert_sent": alert_sent })
}

async fn deliver_webhook(state: &AppState, url: &str, body: Value) -> bool {
    let result = state.http_client.post(url).timeout(WEBHOOK_TIMEOUT).json(&body).send().await;
    match result {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            warn!(url, status = %response.status(), "webhook delivery returned non-success status");
            false
        }
        Err(e) => {
            warn!(url, error = %e, "webhook delivery failed");
            false
        }
    }
}

