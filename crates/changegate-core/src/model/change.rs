use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::Snapshot;
use crate::diff::{compute_diff, DiffResult};
use crate::errors::{GateError, Result};
use crate::risk::RiskAssessment;

/// Review status of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    Pending,
    /// A policy with a `block` action was violated
    Blocked,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "PENDING",
            ChangeStatus::Blocked => "BLOCKED",
            ChangeStatus::Approved => "APPROVED",
            ChangeStatus::Rejected => "REJECTED",
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "PENDING" => Ok(ChangeStatus::Pending),
            "BLOCKED" => Ok(ChangeStatus::Blocked),
            "APPROVED" => Ok(ChangeStatus::Approved),
            "REJECTED" => Ok(ChangeStatus::Rejected),
            other => Err(GateError::InvalidInput {
                field: "change.status".to_string(),
                reason: format!("unknown status '{}'", other),
            }),
        }
    }
}

/// Soft-delete state of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeState {
    Active,
    Undone,
}

impl ChangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeState::Active => "ACTIVE",
            ChangeState::Undone => "UNDONE",
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "ACTIVE" => Ok(ChangeState::Active),
            "UNDONE" => Ok(ChangeState::Undone),
            other => Err(GateError::InvalidInput {
                field: "change.state".to_string(),
                reason: format!("unknown state '{}'", other),
            }),
        }
    }
}

/// Input for authoring or detecting a change
#[derive(Debug, Clone)]
pub struct NewChange {
    pub app_id: String,
    pub organization_id: String,
    pub sandbox_id: Option<String>,
    pub author_id: Option<String>,
    pub title: String,
    pub before_snapshot: Snapshot,
    pub after_snapshot: Snapshot,
    pub before_code: Option<String>,
    pub after_code: Option<String>,
}

/// Change - one detected or authored modification between two snapshots
///
/// Carries exactly one diff, recomputed whenever the snapshots are replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub app_id: String,
    pub organization_id: String,
    pub sandbox_id: Option<String>,
    pub author_id: Option<String>,
    pub title: String,
    pub before_snapshot: Snapshot,
    pub after_snapshot: Snapshot,
    pub diff_result: DiffResult,
    pub before_code: Option<String>,
    pub after_code: Option<String>,
    pub risk_assessment: Option<RiskAssessment>,
    pub status: ChangeStatus,
    pub state: ChangeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Change {
    /// Create a change, computing its diff
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `app_id` or `title` is blank.
    pub fn new(id: String, input: NewChange) -> Result<Self> {
        if input.app_id.trim().is_empty() {
            return Err(GateError::InvalidInput {
                field: "app_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if input.title.trim().is_empty() {
            return Err(GateError::InvalidInput {
                field: "title".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let diff_result = compute_diff(&input.before_snapshot.document, &input.after_snapshot.document);
        let now = Utc::now();
        Ok(Self {
            id,
            app_id: input.app_id,
            organization_id: input.organization_id,
            sandbox_id: input.sandbox_id,
            author_id: input.author_id,
            title: input.title,
            before_snapshot: input.before_snapshot,
            after_snapshot: input.after_snapshot,
            diff_result,
            before_code: input.before_code,
            after_code: input.after_code,
            risk_assessment: None,
            status: ChangeStatus::Pending,
            state: ChangeState::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the snapshots and recompute the diff
    pub fn set_snapshots(&mut self, before: Snapshot, after: Snapshot) {
        self.diff_result = compute_diff(&before.document, &after.document);
        self.before_snapshot = before;
        self.after_snapshot = after;
        self.updated_at = Utc::now();
    }

    /// Whether a formula analysis applies to this change
    pub fn has_code(&self) -> bool {
        self.before_code.is_some() || self.after_code.is_some()
    }

    /// Store an assessment, overwriting any previous one.
    ///
    /// An auto-blocking assessment marks the change BLOCKED; a clean
    /// re-score of a BLOCKED change returns it to PENDING.
    pub fn apply_assessment(&mut self, assessment: RiskAssessment) {
        if assessment.auto_block {
            self.status = ChangeStatus::Blocked;
        } else if self.status == ChangeStatus::Blocked {
            self.status = ChangeStatus::Pending;
        }
        self.risk_assessment = Some(assessment);
        self.updated_at = Utc::now();
    }

    /// Soft delete
    ///
    /// # Errors
    ///
    /// Returns `ChangeAlreadyUndone` if the change is already undone.
    pub fn undo(&mut self) -> Result<()> {
        if self.state == ChangeState::Undone {
            return Err(GateError::ChangeAlreadyUndone {
                change_id: self.id.clone(),
            });
        }
        self.state = ChangeState::Undone;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reverse a soft delete
    ///
    /// # Errors
    ///
    /// Returns `ChangeNotUndone` if the change is active.
    pub fn restore(&mut self) -> Result<()> {
        if self.state == ChangeState::Active {
            return Err(GateError::ChangeNotUndone {
                change_id: self.id.clone(),
            });
        }
        self.state = ChangeState::Active;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state == ChangeState::Active
    }

    /// Active and not yet decided
    pub fn is_outstanding(&self) -> bool {
        self.is_active() && matches!(self.status, ChangeStatus::Pending | ChangeStatus::Blocked)
    }

    pub fn is_auto_blocked(&self) -> bool {
        self.risk_assessment
            .as_ref()
            .map(|a| a.auto_block)
            .unwrap_or(false)
    }
}
