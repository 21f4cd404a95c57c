//! Workflow templates (C11, §4.11).
//!
//! A workflow binds an input schema to exactly one underlying [`Job`] plus
//! post-processing that produces a domain-specific output and an optional
//! webhook. Three templates ship built in; `registry()` is the lookup used
//! by the HTTP surface (`GET /api/v1/workflows`, `POST .../run`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::job::{JobType, Strategy};

/// A minimal field-presence schema — not a full JSON Schema implementation,
/// just enough to enforce §4.11's "input validation enforces `required`
/// fields" requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    pub required: Vec<String>,
    pub fields: Vec<String>,
}

/// A registered workflow template.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowTemplate {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub input_schema: InputSchema,
    pub job_type: JobType,
    pub default_strategy: Strategy,
}

/// Validate a workflow run request's input map against its schema.
///
/// # Errors
///
/// Returns [`WorkflowError::MissingField`] if a required field is absent.
pub fn validate_input(schema: &InputSchema, input: &HashMap<String, serde_json::Value>) -> Result<(), WorkflowError> {
    for field in &schema.required {
        if !input.contains_key(field) {
            return Err(WorkflowError::MissingField(field.clone()));
        }
    }
    Ok(())
}

fn page_change_detection() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "page_change_detection",
        display_name: "Page Change Detection",
        description: "Extract selectors from a page and alert when content diverges from a baseline hash.",
        input_schema: InputSchema {
            required: vec!["url".to_owned(), "domain".to_owned(), "selectors".to_owned()],
            fields: vec![
                "url".to_owned(),
                "domain".to_owned(),
                "selectors".to_owned(),
                "baseline_content".to_owned(),
                "alert_on_change".to_owned(),
                "webhook_url".to_owned(),
                "strategy".to_owned(),
            ],
        },
        job_type: JobType::NavigateExtract,
        default_strategy: Strategy::Vanilla,
    }
}

fn job_posting_monitor() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "job_posting_monitor",
        display_name: "Job Posting Monitor",
        description: "Extract postings by field selector and alert when new postings match the keyword filter.",
        input_schema: InputSchema {
            required: vec!["url".to_owned(), "domain".to_owned(), "extract_fields".to_owned()],
            fields: vec![
                "url".to_owned(),
                "domain".to_owned(),
                "extract_fields".to_owned(),
                "alert_on_new".to_owned(),
                "filter_keywords".to_owned(),
            ],
        },
        job_type: JobType::NavigateExtract,
        default_strategy: Strategy::Vanilla,
    }
}

fn uptime_smoke_check() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "uptime_smoke_check",
        display_name: "Uptime Smoke Check",
        description: "Navigate to a page and verify required selectors and load time stay within bounds.",
        input_schema: InputSchema {
            required: vec!["url".to_owned(), "domain".to_owned(), "required_selectors".to_owned()],
            fields: vec![
                "url".to_owned(),
                "domain".to_owned(),
                "required_selectors".to_owned(),
                "screenshot".to_owned(),
                "verify_load_time".to_owned(),
                "max_load_time_ms".to_owned(),
            ],
        },
        job_type: JobType::NavigateExtract,
        default_strategy: Strategy::Vanilla,
    }
}

/// All built-in workflow templates, keyed by name.
#[must_use]
pub fn registry() -> HashMap<&'static str, WorkflowTemplate> {
    [page_change_detection(), job_posting_monitor(), uptime_smoke_check()]
        .into_iter()
        .map(|t| (t.name, t))
        .collect()
}

/// Look up a workflow template by name.
///
/// # Errors
///
/// Returns [`WorkflowError::UnknownTemplate`] if `name` is not registered.
pub fn lookup(name: &str) -> Result<WorkflowTemplate, WorkflowError> {
    registry().remove(name).ok_or_else(|| WorkflowError::UnknownTemplate(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_three_templates_are_registered() {
        let reg = registry();
        assert!(reg.contains_key("page_change_detection"));
        assert!(reg.contains_key("job_posting_monitor"));
        assert!(reg.contains_key("uptime_smoke_check"));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let template = lookup("uptime_smoke_check").expect("registered");
        let mut input = HashMap::new();
        input.insert("url".to_owned(), serde_json::json!("https://example.com"));
        let result = validate_input(&template.input_schema, &input);
        assert!(matches!(result, Err(WorkflowError::MissingField(_))));
    }

    #[test]
    fn complete_input_validates() {
        let template = lookup("uptime_smoke_check").expect("registered");
        let mut input = HashMap::new();
        input.insert("url".to_owned(), serde_json::json!("https://example.com"));
        input.insert("domain".to_owned(), serde_json::json!("example.com"));
        input.insert("required_selectors".to_owned(), serde_json::json!(["#main"]));
        assert!(validate_input(&template.input_schema, &input).is_ok());
    }

    #[test]
    fn unknown_template_errors() {
        assert!(matches!(lookup("does_not_exist"), Err(WorkflowError::UnknownTemplate(_))));
    }
}
