//! Row-level types that exist only at the persistence boundary

use changegate_core::model::{SandboxStatus, SandboxType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Selection for sandbox listings; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct SandboxFilter {
    pub organization_id: Option<String>,
    pub statuses: Vec<SandboxStatus>,
    pub sandbox_type: Option<SandboxType>,
    pub app_id: Option<String>,
    pub created_by_id: Option<String>,
}

impl SandboxFilter {
    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[SandboxStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }
}

/// Selection for change listings
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub organization_id: Option<String>,
    pub app_id: Option<String>,
    pub sandbox_id: Option<String>,
    /// Undone changes are hidden unless set
    pub include_undone: bool,
}

/// One audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned on insert
    #[serde(default)]
    pub id: Option<i64>,
    pub actor_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            actor_id: actor_id.into(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            before_state: None,
            after_state: None,
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_states(mut self, before: Option<&str>, after: Option<&str>) -> Self {
        self.before_state = before.map(str::to_string);
        self.after_state = after.map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
