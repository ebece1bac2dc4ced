//! Collaborators the engine consumes
//!
//! Each trait is the seam to an external system: app catalog, policy
//! engine, formula analyzer, low-code platform, version control,
//! notification delivery and the audit trail. Implementations live
//! outside this crate; tests supply in-memory fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use changegate_core::errors::{ExError, ExErrorKind};
use changegate_core::model::{AppInfo, Change, Component, Platform, Snapshot};
use changegate_core::policy::{FormulaInput, FormulaResult, PolicyResult};
use changegate_core::sandbox::{ConflictDetector, FileDiff, PathOverlapDetector};
use changegate_store::AuditEntry;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Apps, their components and the people allowed to review them
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_app(&self, app_id: &str) -> Result<Option<AppInfo>>;

    async fn list_components(&self, app_id: &str) -> Result<Vec<Component>>;

    /// User ids with reviewer rights in the organization
    async fn list_reviewers(&self, organization_id: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, change: &Change, organization_id: &str) -> Result<PolicyResult>;
}

#[async_trait]
pub trait FormulaAnalyzer: Send + Sync {
    async fn analyze(&self, input: FormulaInput<'_>) -> Result<FormulaResult>;
}

/// Readiness of a provisioned environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub storage_mb: u64,
}

/// One low-code platform's management API
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn validate_credentials(&self, app: &AppInfo) -> Result<()>;

    /// Full app definition on `branch`, tagged with its revision
    async fn export_snapshot(&self, app: &AppInfo, branch: &str) -> Result<Snapshot>;

    /// Returns the revision the branch starts at
    async fn create_branch(&self, app: &AppInfo, branch: &str) -> Result<String>;

    async fn delete_branch(&self, app: &AppInfo, branch: &str) -> Result<()>;

    async fn branch_exists(&self, app: &AppInfo, branch: &str) -> Result<bool>;

    /// Request an isolated environment; returns its id
    async fn provision(&self, app: &AppInfo, sandbox_id: &str) -> Result<String>;

    async fn deprovision(&self, environment_id: &str) -> Result<()>;

    async fn start(&self, environment_id: &str) -> Result<()>;

    async fn stop(&self, environment_id: &str) -> Result<()>;

    async fn get_status(&self, environment_id: &str) -> Result<EnvironmentStatus>;

    async fn get_resource_usage(&self, environment_id: &str) -> Result<ResourceUsage>;
}

/// Git-style storage for exported snapshots
#[async_trait]
pub trait VcsConnector: Send + Sync {
    /// Commit a snapshot to `branch`; returns the commit id
    async fn commit_snapshot(
        &self,
        repository: &str,
        branch: &str,
        snapshot: &Snapshot,
        message: &str,
    ) -> Result<String>;

    /// Files changed between two commits
    async fn compare_commits(&self, repository: &str, base: &str, head: &str)
        -> Result<Vec<FileDiff>>;

    /// Branch `branch` off `from_commit`; returns the new head
    async fn create_branch(&self, repository: &str, branch: &str, from_commit: &str)
        -> Result<String>;

    async fn delete_branch(&self, repository: &str, branch: &str) -> Result<()>;

    async fn branch_head(&self, repository: &str, branch: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SandboxReady,
    ProvisioningFailed,
    ReviewRequested,
    ChangesRequested,
    Merged,
    Rejected,
    ConflictDetected,
    ConflictResolved,
    Abandoned,
    ExpiryWarning,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub sandbox_id: String,
    pub message: String,
}

impl Notification {
    pub fn new(
        recipient_id: impl Into<String>,
        kind: NotificationKind,
        sandbox_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            kind,
            sandbox_id: sandbox_id.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Policy evaluator that passes everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPolicyEvaluator;

#[async_trait]
impl PolicyEvaluator for NoopPolicyEvaluator {
    async fn evaluate(&self, _change: &Change, _organization_id: &str) -> Result<PolicyResult> {
        Ok(PolicyResult::passed())
    }
}

/// Formula analyzer for deployments without one; every call fails, so
/// assessments record `formula` as degraded
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableFormulaAnalyzer;

#[async_trait]
impl FormulaAnalyzer for UnavailableFormulaAnalyzer {
    async fn analyze(&self, _input: FormulaInput<'_>) -> Result<FormulaResult> {
        Err(ExError::new(ExErrorKind::NotSupported)
            .with_op("formula_analyze")
            .with_message("no formula analyzer configured"))
    }
}

/// Notification sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            recipient_id = %notification.recipient_id,
            kind = ?notification.kind,
            sandbox_id = %notification.sandbox_id,
            "notification"
        );
        Ok(())
    }
}

/// Everything the engine talks to
#[derive(Clone)]
pub struct Connectors {
    pub catalog: Arc<dyn Catalog>,
    pub policy: Arc<dyn PolicyEvaluator>,
    pub formula: Arc<dyn FormulaAnalyzer>,
    pub platforms: HashMap<Platform, Arc<dyn PlatformConnector>>,
    pub vcs: Arc<dyn VcsConnector>,
    pub notifications: Arc<dyn NotificationSink>,
    pub audit: Arc<dyn AuditSink>,
    pub conflicts: Arc<dyn ConflictDetector>,
}

impl Connectors {
    /// Connectors with the default policy, formula, notification and
    /// conflict implementations; add platforms with [`Connectors::with_platform`]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        vcs: Arc<dyn VcsConnector>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            catalog,
            policy: Arc::new(NoopPolicyEvaluator),
            formula: Arc::new(UnavailableFormulaAnalyzer),
            platforms: HashMap::new(),
            vcs,
            notifications: Arc::new(LogNotificationSink),
            audit,
            conflicts: Arc::new(PathOverlapDetector),
        }
    }

    pub fn with_platform(mut self, platform: Platform, connector: Arc<dyn PlatformConnector>) -> Self {
        self.platforms.insert(platform, connector);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_formula(mut self, formula: Arc<dyn FormulaAnalyzer>) -> Self {
        self.formula = formula;
        self
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    pub fn with_conflict_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.conflicts = detector;
        self
    }

    /// Connector for `platform`
    pub fn platform(&self, platform: Platform) -> Result<Arc<dyn PlatformConnector>> {
        self.platforms.get(&platform).cloned().ok_or_else(|| {
            ExError::new(ExErrorKind::NotSupported)
                .with_op("platform_connector")
                .with_message(format!("no connector registered for {}", platform))
        })
    }
}

impl std::fmt::Debug for Connectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectors")
            .field("platforms", &self.platforms.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
