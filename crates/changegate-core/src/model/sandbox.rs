use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::app::Platform;
use super::snapshot::Snapshot;
use crate::errors::{GateError, Result};

/// Kind of isolated workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxType {
    Personal,
    Team,
    Feature,
    /// Copy of an existing app; requires `source_app_id`
    Clone,
}

impl SandboxType {
    pub const ALL: [SandboxType; 4] = [
        SandboxType::Personal,
        SandboxType::Team,
        SandboxType::Feature,
        SandboxType::Clone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxType::Personal => "PERSONAL",
            SandboxType::Team => "TEAM",
            SandboxType::Feature => "FEATURE",
            SandboxType::Clone => "CLONE",
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| GateError::InvalidInput {
                field: "sandbox_type".to_string(),
                reason: format!("unknown sandbox type '{}'", name),
            })
    }
}

impl std::fmt::Display for SandboxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status; transitions are validated in [`crate::sandbox::lifecycle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxStatus {
    Provisioning,
    Active,
    Suspended,
    ChangesRequested,
    PendingReview,
    Merged,
    Abandoned,
    Rejected,
    Expired,
    Failed,
    Deleted,
}

impl SandboxStatus {
    pub const ALL: [SandboxStatus; 11] = [
        SandboxStatus::Provisioning,
        SandboxStatus::Active,
        SandboxStatus::Suspended,
        SandboxStatus::ChangesRequested,
        SandboxStatus::PendingReview,
        SandboxStatus::Merged,
        SandboxStatus::Abandoned,
        SandboxStatus::Rejected,
        SandboxStatus::Expired,
        SandboxStatus::Failed,
        SandboxStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Provisioning => "PROVISIONING",
            SandboxStatus::Active => "ACTIVE",
            SandboxStatus::Suspended => "SUSPENDED",
            SandboxStatus::ChangesRequested => "CHANGES_REQUESTED",
            SandboxStatus::PendingReview => "PENDING_REVIEW",
            SandboxStatus::Merged => "MERGED",
            SandboxStatus::Abandoned => "ABANDONED",
            SandboxStatus::Rejected => "REJECTED",
            SandboxStatus::Expired => "EXPIRED",
            SandboxStatus::Failed => "FAILED",
            SandboxStatus::Deleted => "DELETED",
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == name)
            .ok_or_else(|| GateError::InvalidInput {
                field: "status".to_string(),
                reason: format!("unknown sandbox status '{}'", name),
            })
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    None,
    /// Trunk advanced but touched no path the sandbox touched
    Potential,
    NeedsResolution,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::None => "NONE",
            ConflictStatus::Potential => "POTENTIAL",
            ConflictStatus::NeedsResolution => "NEEDS_RESOLUTION",
            ConflictStatus::Resolved => "RESOLVED",
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "NONE" => Ok(ConflictStatus::None),
            "POTENTIAL" => Ok(ConflictStatus::Potential),
            "NEEDS_RESOLUTION" => Ok(ConflictStatus::NeedsResolution),
            "RESOLVED" => Ok(ConflictStatus::Resolved),
            other => Err(GateError::InvalidInput {
                field: "conflict_status".to_string(),
                reason: format!("unknown conflict status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepSandbox,
    KeepTrunk,
    Manual,
}

/// Record of how a reviewer resolved a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub strategy: ResolutionStrategy,
    pub notes: Option<String>,
    /// Paths that were in conflict when resolved
    pub paths: Vec<String>,
}

/// Caller input for `create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub app_id: Option<String>,
    pub source_app_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub sandbox_type: SandboxType,
    /// Overrides the type's default lifetime
    pub duration_days: Option<u32>,
}

/// Caller input for `update`; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Sandbox - an isolated workspace where an app is modified before promotion
///
/// `status` and `conflict_status` are crate-private: they move only through the
/// validated methods in [`crate::sandbox`]. Storage round-trips the whole
/// record through serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub organization_id: String,
    pub app_id: Option<String>,
    pub source_app_id: Option<String>,
    pub created_by_id: String,
    pub name: String,
    pub description: Option<String>,
    pub sandbox_type: SandboxType,
    pub platform: Platform,
    pub(crate) status: SandboxStatus,
    pub(crate) conflict_status: ConflictStatus,
    pub conflicts: Vec<String>,
    pub conflict_resolution: Option<ConflictResolution>,
    pub environment_id: Option<String>,
    pub platform_branch: Option<String>,
    pub base_revision: Option<String>,
    pub latest_revision: Option<String>,
    pub vcs_branch: Option<String>,
    pub base_commit: Option<String>,
    pub latest_commit: Option<String>,
    pub last_snapshot: Option<Snapshot>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Warning thresholds (days) already notified
    pub expiry_warnings_sent: Vec<u32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sandbox {
    /// New sandbox in PROVISIONING
    pub fn new(
        id: String,
        request: SandboxRequest,
        created_by_id: String,
        organization_id: String,
        platform: Platform,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            organization_id,
            app_id: request.app_id,
            source_app_id: request.source_app_id,
            created_by_id,
            name: request.name,
            description: request.description,
            sandbox_type: request.sandbox_type,
            platform,
            status: SandboxStatus::Provisioning,
            conflict_status: ConflictStatus::None,
            conflicts: Vec::new(),
            conflict_resolution: None,
            environment_id: None,
            platform_branch: None,
            base_revision: None,
            latest_revision: None,
            vcs_branch: None,
            base_commit: None,
            latest_commit: None,
            last_snapshot: None,
            last_synced_at: None,
            expires_at,
            expiry_warnings_sent: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SandboxStatus {
        self.status
    }

    pub fn conflict_status(&self) -> ConflictStatus {
        self.conflict_status
    }

    /// The app whose definition this sandbox works on
    pub fn subject_app_id(&self) -> Option<&str> {
        self.app_id.as_deref().or(self.source_app_id.as_deref())
    }

    pub fn is_clone(&self) -> bool {
        self.sandbox_type == SandboxType::Clone
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.created_by_id == user_id
    }

    /// Apply caller edits
    pub fn apply_update(&mut self, update: SandboxUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        self.updated_at = Utc::now();
    }
}
