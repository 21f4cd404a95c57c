//! Append-only admission audit log (C4, §3, §6.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PolicyAction;
use crate::job::{AuthorizationMode, Strategy};

/// One row of the append-only audit log. Never mutated after being written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub domain: String,
    pub policy_id: Option<Uuid>,
    pub authorization_mode: AuthorizationMode,
    pub strategy: Strategy,
    pub action: String,
    pub allowed: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub context: serde_json::Value,
}

/// Parameters for recording one admission decision.
pub struct AuditRecord<'a> {
    pub job_id: Option<Uuid>,
    pub domain: &'a str,
    pub policy_id: Option<Uuid>,
    pub authorization_mode: AuthorizationMode,
    pub strategy: Strategy,
    pub action: PolicyAction,
    pub reason: &'a str,
    pub user_id: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub context: serde_json::Value,
}

impl AuditLogEntry {
    #[must_use]
    pub fn from_record(record: AuditRecord<'_>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: record.job_id,
            domain: record.domain.to_owned(),
            policy_id: record.policy_id,
            authorization_mode: record.authorization_mode,
            strategy: record.strategy,
            action: record.action.as_str().to_owned(),
            allowed: record.action == PolicyAction::Allow,
            reason: record.reason.to_owned(),
            timestamp: Utc::now(),
            user_id: record.user_id.map(ToOwned::to_owned),
            ip_address: record.ip_address.map(ToOwned::to_owned),
            context: record.context,
        }
    }
}
