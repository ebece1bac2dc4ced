//! Sandbox lifecycle orchestration
//!
//! The orchestrator owns every operation that moves a sandbox through its
//! state machine. External calls run first and local state is written only
//! after they succeed; cleanup of platform resources is best-effort and
//! never blocks a transition.
//!
//! Writes go through a compare-and-set on the stored status so a transition
//! racing another writer fails with a `Concurrency` error instead of
//! silently overwriting it.

mod lifecycle;
mod provisioning;
mod review;
mod sweeps;
mod sync;

use std::sync::Arc;

use changegate_core::errors::{ExError, ExErrorKind, GateError};
use changegate_core::model::{Actor, AppInfo, Sandbox, SandboxStatus};
use changegate_core::rules::ensure_same_organization;
use changegate_store::{AuditEntry, SharedConnection, SqliteRepo};
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;

use crate::changes::record_audit;
use crate::config::EngineConfig;
use crate::connectors::{Connectors, Notification, NotificationKind};
use crate::errors::{busy, status_moved, with_timeout, Result};
use crate::jobs::JobQueue;
use crate::pipeline::AssessmentPipeline;
use crate::progress::ProgressHub;

pub use provisioning::ProvisionJob;
pub use review::ReviewDecision;
pub use sweeps::SweepReport;
pub use sync::SyncOutcome;

/// Actor id recorded for transitions the engine makes on its own
pub const SYSTEM_ACTOR: &str = "system";

/// Entry point for sandbox operations; cheap to clone
#[derive(Clone)]
pub struct SandboxOrchestrator {
    inner: Arc<Inner>,
    jobs: JobQueue<ProvisionJob>,
}

pub(crate) struct Inner {
    db: SharedConnection,
    connectors: Connectors,
    pipeline: AssessmentPipeline,
    config: EngineConfig,
    progress: ProgressHub,
    in_flight: DashMap<String, ()>,
}

impl SandboxOrchestrator {
    /// Build the orchestrator and start its provisioning workers
    ///
    /// Must be called from inside a tokio runtime.
    pub fn launch(
        db: SharedConnection,
        connectors: Connectors,
        pipeline: AssessmentPipeline,
        config: EngineConfig,
        progress: ProgressHub,
    ) -> Self {
        let workers = config.provisioning.workers;
        let capacity = config.provisioning.queue_capacity;
        let inner = Arc::new(Inner {
            db,
            connectors,
            pipeline,
            config,
            progress,
            in_flight: DashMap::new(),
        });
        let jobs = JobQueue::start(Arc::clone(&inner), workers, capacity);
        Self { inner, jobs }
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.inner.progress
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for SandboxOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxOrchestrator")
            .field("connectors", &self.inner.connectors)
            .field("workers", &self.jobs.worker_count())
            .finish_non_exhaustive()
    }
}

/// Held while a sync or submit runs; releases the sandbox on drop
pub(crate) struct InFlightGuard<'a> {
    map: &'a DashMap<String, ()>,
    sandbox_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.sandbox_id);
    }
}

impl Inner {
    /// Claim `sandbox_id` for an exclusive sync or submit
    fn claim(&self, sandbox_id: &str) -> Result<InFlightGuard<'_>> {
        if self.in_flight.insert(sandbox_id.to_string(), ()).is_some() {
            return Err(busy(sandbox_id));
        }
        Ok(InFlightGuard {
            map: &self.in_flight,
            sandbox_id: sandbox_id.to_string(),
        })
    }

    /// Load a sandbox the actor's organization owns
    fn load(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        let sandbox = self.load_any(sandbox_id)?;
        ensure_same_organization(actor, &sandbox)?;
        Ok(sandbox)
    }

    fn load_any(&self, sandbox_id: &str) -> Result<Sandbox> {
        self.db
            .with(|conn| SqliteRepo::get_sandbox(conn, sandbox_id))?
            .ok_or_else(|| {
                GateError::SandboxNotFound {
                    sandbox_id: sandbox_id.to_string(),
                }
                .into()
            })
    }

    async fn app(&self, app_id: &str) -> Result<AppInfo> {
        let app = with_timeout(
            "get_app",
            self.config.timeouts.metadata(),
            self.connectors.catalog.get_app(app_id),
        )
        .await?;
        app.ok_or_else(|| {
            GateError::AppNotFound {
                app_id: app_id.to_string(),
            }
            .into()
        })
    }

    /// The app a sandbox works on
    async fn sandbox_app(&self, sandbox: &Sandbox) -> Result<AppInfo> {
        let app_id = sandbox.subject_app_id().ok_or_else(|| {
            ExError::new(ExErrorKind::Internal)
                .with_entity_id(&sandbox.id)
                .with_message("sandbox has no subject app")
        })?;
        self.app(app_id).await
    }

    /// Write `sandbox` if the stored status is still `expected`
    fn persist(&self, sandbox: &Sandbox, expected: SandboxStatus) -> Result<()> {
        let written = self
            .db
            .with(|conn| SqliteRepo::update_sandbox_if_status(conn, sandbox, expected))?;
        if !written {
            return Err(status_moved(&sandbox.id));
        }
        Ok(())
    }

    async fn audit(
        &self,
        actor_id: &str,
        action: &str,
        sandbox: &Sandbox,
        before: Option<SandboxStatus>,
        details: Option<Value>,
    ) {
        let mut entry = AuditEntry::new(actor_id, action, "sandbox", &sandbox.id).with_states(
            before.map(|s| s.as_str()),
            Some(sandbox.status().as_str()),
        );
        if let Some(details) = details {
            entry = entry.with_details(details);
        }
        record_audit(self.connectors.audit.as_ref(), entry).await;
    }

    /// Deliver a notification; failures are logged
    async fn notify(
        &self,
        recipient_id: &str,
        kind: NotificationKind,
        sandbox_id: &str,
        message: impl Into<String>,
    ) -> bool {
        let notification = Notification::new(recipient_id, kind, sandbox_id, message);
        match self.connectors.notifications.notify(notification).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    sandbox_id = sandbox_id,
                    recipient_id = recipient_id,
                    kind = ?kind,
                    error = %err,
                    "notification failed"
                );
                false
            }
        }
    }

    /// Notify every reviewer of the organization
    async fn notify_reviewers(&self, sandbox: &Sandbox, kind: NotificationKind, message: &str) {
        let reviewers = with_timeout(
            "list_reviewers",
            self.config.timeouts.metadata(),
            self.connectors
                .catalog
                .list_reviewers(&sandbox.organization_id),
        )
        .await;
        match reviewers {
            Ok(reviewers) => {
                let sends = reviewers
                    .iter()
                    .map(|reviewer| self.notify(reviewer, kind, &sandbox.id, message));
                join_all(sends).await;
            }
            Err(err) => {
                tracing::warn!(sandbox_id = %sandbox.id, error = %err, "could not list reviewers");
            }
        }
    }

    /// Best-effort removal of a sandbox's branches and environment
    async fn release_resources(&self, sandbox: &Sandbox, app: Option<&AppInfo>, branches: bool) {
        let Ok(platform) = self.connectors.platform(sandbox.platform) else {
            return;
        };
        let timeout = self.config.timeouts.provision();

        if branches {
            if let (Some(app), Some(branch)) = (app, sandbox.platform_branch.as_deref()) {
                if let Err(err) =
                    with_timeout("delete_branch", timeout, platform.delete_branch(app, branch)).await
                {
                    tracing::warn!(sandbox_id = %sandbox.id, error = %err, "platform branch cleanup failed");
                }
            }
            if let (Some(app), Some(branch)) = (app, sandbox.vcs_branch.as_deref()) {
                let delete = self
                    .connectors
                    .vcs
                    .delete_branch(&app.repository, branch);
                if let Err(err) = with_timeout("delete_branch", timeout, delete).await {
                    tracing::warn!(sandbox_id = %sandbox.id, error = %err, "vcs branch cleanup failed");
                }
            }
        }
        if let Some(env) = sandbox.environment_id.as_deref() {
            if let Err(err) = with_timeout("deprovision", timeout, platform.deprovision(env)).await {
                tracing::warn!(sandbox_id = %sandbox.id, error = %err, "deprovision failed");
            }
        }
    }
}

pub(crate) fn sandbox_branch(sandbox_id: &str) -> String {
    format!("sandbox/{}", sandbox_id)
}
