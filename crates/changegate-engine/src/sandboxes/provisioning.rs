//! Create and the background provisioning job

use std::time::Instant;

use async_trait::async_trait;
use changegate_core::errors::{ExError, GateError};
use changegate_core::model::{Actor, AppInfo, Sandbox, SandboxRequest, SandboxStatus};
use changegate_core::rules::validate_sandbox_request;
use changegate_core::sandbox::{check_quota, ProvisionedWorkspace};
use changegate_core::{log_op_end, log_op_error, log_op_start};
use changegate_store::SqliteRepo;
use chrono::Utc;
use serde_json::json;

use super::{sandbox_branch, Inner, SandboxOrchestrator, SYSTEM_ACTOR};
use crate::changes::{finish, new_id};
use crate::connectors::{EnvironmentStatus, NotificationKind};
use crate::errors::{external, timed_out, with_timeout, Result};
use crate::jobs::{JobHandler, JobTicket};
use crate::progress::{ProgressStatus, Stage};

const OPERATION: &str = "provision";

/// Queued work for one PROVISIONING sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionJob {
    pub sandbox_id: String,
}

impl SandboxOrchestrator {
    /// Validate, check quota, persist PROVISIONING and queue provisioning
    ///
    /// Nothing external is called before the quota check passes. The
    /// returned ticket resolves once the background job has finished,
    /// whether it succeeded or not.
    pub async fn create(&self, actor: &Actor, request: SandboxRequest) -> Result<(Sandbox, JobTicket)> {
        let start = Instant::now();
        log_op_start!("sandbox_create", sandbox_type = %request.sandbox_type);

        let result = async {
            validate_sandbox_request(&request)?;
            let inner = &self.inner;
            let subject = request
                .app_id
                .clone()
                .or_else(|| request.source_app_id.clone())
                .unwrap_or_default();

            let now = Utc::now();
            let expires_at =
                inner
                    .config
                    .expiry
                    .initial_expiry(request.sandbox_type, request.duration_days, now)?;

            // Checked before any external call, and again inside the insert
            // transaction so two creates cannot both take the last slot
            let quota_check = |conn: &rusqlite::Connection| -> Result<()> {
                let usage = SqliteRepo::quota_usage(
                    conn,
                    &actor.organization_id,
                    request.sandbox_type,
                    request.source_app_id.as_deref(),
                )?;
                check_quota(&inner.config.quotas, &usage, request.sandbox_type)?;
                Ok(())
            };
            inner.db.with(|conn| quota_check(conn))?;

            let app = inner.app(&subject).await?;
            if app.organization_id != actor.organization_id {
                return Err(GateError::AppNotFound { app_id: subject }.into());
            }
            inner.connectors.platform(app.platform)?;

            let sandbox = Sandbox::new(
                new_id(),
                request.clone(),
                actor.user_id.clone(),
                actor.organization_id.clone(),
                app.platform,
                expires_at,
            );
            inner.db.transaction(|tx| {
                quota_check(tx)?;
                SqliteRepo::insert_sandbox(tx, &sandbox)
            })?;
            inner
                .audit(&actor.user_id, "sandbox.create", &sandbox, None, None)
                .await;

            let ticket = self
                .jobs
                .submit(ProvisionJob {
                    sandbox_id: sandbox.id.clone(),
                })
                .await?;
            Ok((sandbox, ticket))
        }
        .await;
        finish("sandbox_create", start, &result);
        result
    }
}

#[async_trait]
impl JobHandler<ProvisionJob> for Inner {
    async fn handle(&self, job: ProvisionJob) {
        let start = Instant::now();
        log_op_start!("sandbox_provision", sandbox_id = %job.sandbox_id);
        match self.provision(&job.sandbox_id).await {
            Ok(()) => log_op_end!(
                "sandbox_provision",
                duration_ms = start.elapsed().as_millis() as u64
            ),
            Err(err) => log_op_error!(
                "sandbox_provision",
                err,
                duration_ms = start.elapsed().as_millis() as u64
            ),
        }
    }
}

/// Resources created so far, for rollback
#[derive(Default)]
struct Created {
    environment_id: Option<String>,
    platform_branch: Option<String>,
    vcs_branch: Option<String>,
}

impl Inner {
    async fn provision(&self, sandbox_id: &str) -> Result<()> {
        let mut sandbox = self.load_any(sandbox_id)?;
        if sandbox.status() != SandboxStatus::Provisioning {
            tracing::debug!(sandbox_id, status = %sandbox.status(), "sandbox left PROVISIONING; skipping job");
            return Ok(());
        }

        let app = match self.sandbox_app(&sandbox).await {
            Ok(app) => app,
            Err(err) => return self.fail_provisioning(sandbox, &err).await,
        };

        // Environment: a failure here leaves a FAILED record the owner can see
        self.stage(sandbox_id, Stage::Provisioning, ProgressStatus::Running, None);
        let environment_id = match self.provision_environment(&sandbox, &app).await {
            Ok(env) => env,
            Err(err) => return self.fail_provisioning(sandbox, &err).await,
        };
        let mut created = Created {
            environment_id: Some(environment_id),
            ..Created::default()
        };

        // Branches: a failure here rolls everything back
        self.stage(sandbox_id, Stage::CreatingBranches, ProgressStatus::Running, None);
        let branch = sandbox_branch(sandbox_id);
        let (revision, base_commit) = match self.create_branches(&app, &branch, &mut created).await {
            Ok(pointers) => pointers,
            Err(err) => return self.roll_back(sandbox, &app, created, &err).await,
        };

        self.stage(sandbox_id, Stage::CapturingBaseline, ProgressStatus::Running, None);
        let baseline = with_timeout(
            "export_snapshot",
            self.config.timeouts.export(),
            self.platform_for(&sandbox)?.export_snapshot(&app, &branch),
        )
        .await;
        let baseline = match baseline {
            Ok(snapshot) => snapshot,
            Err(err) => {
                sandbox.environment_id = created.environment_id.clone();
                sandbox.platform_branch = created.platform_branch.clone();
                sandbox.vcs_branch = created.vcs_branch.clone();
                self.release_resources(&sandbox, Some(&app), true).await;
                sandbox.environment_id = None;
                return self.fail_provisioning(sandbox, &err).await;
            }
        };

        let base_revision = baseline.revision.clone().unwrap_or(revision);
        sandbox.complete_provisioning(ProvisionedWorkspace {
            environment_id: created.environment_id.clone().unwrap_or_default(),
            platform_branch: branch.clone(),
            vcs_branch: branch,
            base_revision,
            base_commit,
            base_snapshot: baseline,
        })?;

        let written = self.db.with(|conn| {
            SqliteRepo::update_sandbox_if_status(conn, &sandbox, SandboxStatus::Provisioning)
        })?;
        if !written {
            // Abandoned or deleted while provisioning; drop what was built
            tracing::info!(sandbox_id, "sandbox moved during provisioning; releasing resources");
            self.release_resources(&sandbox, Some(&app), true).await;
            return Ok(());
        }

        self.audit(
            SYSTEM_ACTOR,
            "sandbox.provisioned",
            &sandbox,
            Some(SandboxStatus::Provisioning),
            Some(json!({ "environment_id": sandbox.environment_id })),
        )
        .await;
        self.notify(
            &sandbox.created_by_id,
            NotificationKind::SandboxReady,
            sandbox_id,
            format!("Sandbox '{}' is ready", sandbox.name),
        )
        .await;
        self.stage(sandbox_id, Stage::Complete, ProgressStatus::Completed, None);
        Ok(())
    }

    async fn provision_environment(&self, sandbox: &Sandbox, app: &AppInfo) -> Result<String> {
        let platform = self.platform_for(sandbox)?;
        let environment_id = with_timeout(
            "provision",
            self.config.timeouts.provision(),
            platform.provision(app, &sandbox.id),
        )
        .await?;

        let poll = &self.config.provisioning;
        for attempt in 0..poll.poll_attempts {
            let status = with_timeout(
                "get_status",
                self.config.timeouts.metadata(),
                platform.get_status(&environment_id),
            )
            .await;
            match status {
                Ok(EnvironmentStatus::Ready) => return Ok(environment_id),
                Ok(EnvironmentStatus::Pending) => {
                    tracing::debug!(sandbox_id = %sandbox.id, attempt, "environment pending");
                    tokio::time::sleep(poll.poll_interval()).await;
                }
                Ok(EnvironmentStatus::Failed(reason)) => {
                    self.discard_environment(&environment_id, sandbox).await;
                    return Err(external("provision", reason));
                }
                Err(err) => {
                    self.discard_environment(&environment_id, sandbox).await;
                    return Err(err);
                }
            }
        }
        self.discard_environment(&environment_id, sandbox).await;
        Err(timed_out(
            "provision",
            poll.poll_interval() * poll.poll_attempts,
        ))
    }

    async fn discard_environment(&self, environment_id: &str, sandbox: &Sandbox) {
        let mut partial = sandbox.clone();
        partial.environment_id = Some(environment_id.to_string());
        self.release_resources(&partial, None, false).await;
    }

    /// Platform branch, then a VCS branch off trunk; returns (revision, commit)
    async fn create_branches(
        &self,
        app: &AppInfo,
        branch: &str,
        created: &mut Created,
    ) -> Result<(String, String)> {
        let platform = self.connectors.platform(app.platform)?;
        let metadata = self.config.timeouts.metadata();
        let commit = self.config.timeouts.commit();

        let revision = with_timeout(
            "create_branch",
            metadata,
            platform.create_branch(app, branch),
        )
        .await?;
        created.platform_branch = Some(branch.to_string());

        let vcs = &self.connectors.vcs;
        let trunk_head = with_timeout(
            "branch_head",
            metadata,
            vcs.branch_head(&app.repository, &app.trunk_branch),
        )
        .await?;
        with_timeout(
            "create_branch",
            commit,
            vcs.create_branch(&app.repository, branch, &trunk_head),
        )
        .await?;
        created.vcs_branch = Some(branch.to_string());

        // The new branch starts at trunk's head; that commit is the merge base
        Ok((revision, trunk_head))
    }

    /// Environment failures: keep the record as FAILED with the error
    async fn fail_provisioning(&self, mut sandbox: Sandbox, err: &ExError) -> Result<()> {
        let message = err.to_string();
        sandbox.mark_failed(&message)?;
        self.persist(&sandbox, SandboxStatus::Provisioning)?;
        self.audit(
            SYSTEM_ACTOR,
            "sandbox.provision_failed",
            &sandbox,
            Some(SandboxStatus::Provisioning),
            Some(json!({ "error": message })),
        )
        .await;
        self.notify(
            &sandbox.created_by_id,
            NotificationKind::ProvisioningFailed,
            &sandbox.id,
            format!("Provisioning sandbox '{}' failed: {}", sandbox.name, message),
        )
        .await;
        self.stage(
            &sandbox.id,
            Stage::Provisioning,
            ProgressStatus::Failed,
            Some(message),
        );
        Ok(())
    }

    /// Branch failures: undo everything and remove the record
    async fn roll_back(
        &self,
        mut sandbox: Sandbox,
        app: &AppInfo,
        created: Created,
        err: &ExError,
    ) -> Result<()> {
        let message = err.to_string();
        sandbox.environment_id = created.environment_id;
        sandbox.platform_branch = created.platform_branch;
        sandbox.vcs_branch = created.vcs_branch;
        self.release_resources(&sandbox, Some(app), true).await;

        self.db
            .with(|conn| SqliteRepo::delete_sandbox(conn, &sandbox.id))?;
        self.audit(
            SYSTEM_ACTOR,
            "sandbox.rollback",
            &sandbox,
            Some(SandboxStatus::Provisioning),
            Some(json!({ "error": message })),
        )
        .await;
        self.notify(
            &sandbox.created_by_id,
            NotificationKind::ProvisioningFailed,
            &sandbox.id,
            format!(
                "Sandbox '{}' could not create its branches and was removed: {}",
                sandbox.name, message
            ),
        )
        .await;
        self.stage(
            &sandbox.id,
            Stage::CreatingBranches,
            ProgressStatus::Failed,
            Some(message),
        );
        Ok(())
    }

    fn platform_for(
        &self,
        sandbox: &Sandbox,
    ) -> Result<std::sync::Arc<dyn crate::connectors::PlatformConnector>> {
        self.connectors.platform(sandbox.platform)
    }

    fn stage(&self, sandbox_id: &str, stage: Stage, status: ProgressStatus, message: Option<String>) {
        self.progress
            .stage(sandbox_id, OPERATION, stage, status, message);
    }
}
