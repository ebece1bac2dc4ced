//! Reads, edits, pause/resume, expiry extension and delete

use std::time::Instant;

use changegate_core::errors::GateError;
use changegate_core::model::{Actor, Sandbox, SandboxStatus, SandboxUpdate};
use changegate_core::rules::{ensure_owner_or_reviewer, validate_sandbox_update};
use changegate_core::sandbox::{compute_stats, SandboxStats};
use changegate_core::log_op_start;
use changegate_store::{SandboxFilter, SqliteRepo};
use chrono::Utc;
use serde_json::json;

use super::SandboxOrchestrator;
use crate::changes::finish;
use crate::connectors::ResourceUsage;
use crate::errors::{with_timeout, Result};
use crate::progress::ProgressSubscription;

impl SandboxOrchestrator {
    pub fn get(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        self.inner.load(actor, sandbox_id)
    }

    /// Sandboxes in the actor's organization matching `filter`
    pub fn list(&self, actor: &Actor, filter: SandboxFilter) -> Result<Vec<Sandbox>> {
        let filter = SandboxFilter {
            organization_id: Some(actor.organization_id.clone()),
            ..filter
        };
        self.inner
            .db
            .with(|conn| SqliteRepo::list_sandboxes(conn, &filter))
    }

    /// Counts for the actor's organization; `window_days` bounds "expiring soon"
    pub fn stats(&self, actor: &Actor, window_days: u32) -> Result<SandboxStats> {
        let sandboxes = self.list(actor, SandboxFilter::default())?;
        Ok(compute_stats(&sandboxes, Utc::now(), window_days))
    }

    pub async fn update(
        &self,
        actor: &Actor,
        sandbox_id: &str,
        update: SandboxUpdate,
    ) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_update", sandbox_id = sandbox_id);

        let result = async {
            validate_sandbox_update(&update)?;
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, "update sandbox")?;
            if sandbox.status().is_terminal() {
                return Err(GateError::SandboxTerminal {
                    sandbox_id: sandbox.id.clone(),
                    status: sandbox.status().to_string(),
                }
                .into());
            }
            let status = sandbox.status();
            sandbox.apply_update(update);
            inner.persist(&sandbox, status)?;
            inner
                .audit(&actor.user_id, "sandbox.update", &sandbox, Some(status), None)
                .await;
            Ok(sandbox)
        }
        .await;
        finish("sandbox_update", start, &result);
        result
    }

    /// Move to DELETED and release the sandbox's resources
    ///
    /// The row is kept so the audit trail still resolves.
    pub async fn delete(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_delete", sandbox_id = sandbox_id);

        let result = async {
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, "delete sandbox")?;
            let before = sandbox.transition_to(SandboxStatus::Deleted)?;
            inner.persist(&sandbox, before)?;

            let app = inner.sandbox_app(&sandbox).await.ok();
            inner.release_resources(&sandbox, app.as_ref(), true).await;
            inner
                .audit(&actor.user_id, "sandbox.delete", &sandbox, Some(before), None)
                .await;
            Ok(sandbox)
        }
        .await;
        finish("sandbox_delete", start, &result);
        result
    }

    /// Resume a SUSPENDED sandbox's environment
    pub async fn start(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        self.set_running(actor, sandbox_id, true).await
    }

    /// Suspend an ACTIVE sandbox's environment
    pub async fn stop(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        self.set_running(actor, sandbox_id, false).await
    }

    async fn set_running(&self, actor: &Actor, sandbox_id: &str, running: bool) -> Result<Sandbox> {
        let op = if running { "sandbox_start" } else { "sandbox_stop" };
        let start = Instant::now();
        log_op_start!(op, sandbox_id = sandbox_id);

        let result = async {
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, op)?;
            if !sandbox.platform.supports_pause() {
                return Err(GateError::PlatformUnsupported {
                    op: if running { "start" } else { "stop" }.to_string(),
                    platform: sandbox.platform.to_string(),
                }
                .into());
            }
            let target = if running {
                SandboxStatus::Active
            } else {
                SandboxStatus::Suspended
            };
            // Validate on a copy; the platform call comes before local state
            let mut moved = sandbox.clone();
            let before = moved.transition_to(target)?;

            let platform = inner.connectors.platform(sandbox.platform)?;
            let env = sandbox.environment_id.clone().unwrap_or_default();
            let limit = inner.config.timeouts.provision();
            if running {
                with_timeout("start", limit, platform.start(&env)).await?;
            } else {
                with_timeout("stop", limit, platform.stop(&env)).await?;
            }

            sandbox = moved;
            inner.persist(&sandbox, before)?;
            let action = if running { "sandbox.start" } else { "sandbox.stop" };
            inner
                .audit(&actor.user_id, action, &sandbox, Some(before), None)
                .await;
            Ok(sandbox)
        }
        .await;
        finish(op, start, &result);
        result
    }

    /// Push the expiry out by `days`; sent warnings are reset
    pub async fn extend_expiration(
        &self,
        actor: &Actor,
        sandbox_id: &str,
        days: u32,
    ) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_extend", sandbox_id = sandbox_id, days = days);

        let result = async {
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, "extend sandbox")?;
            let previous = sandbox.expires_at;
            inner.config.expiry.extend(&mut sandbox, days, Utc::now())?;
            inner.persist(&sandbox, sandbox.status())?;
            inner
                .audit(
                    &actor.user_id,
                    "sandbox.extend",
                    &sandbox,
                    Some(sandbox.status()),
                    Some(json!({
                        "previous_expires_at": previous,
                        "expires_at": sandbox.expires_at,
                    })),
                )
                .await;
            Ok(sandbox)
        }
        .await;
        finish("sandbox_extend", start, &result);
        result
    }

    /// Live progress events for one sandbox
    ///
    /// The channel is torn down when the last subscription is dropped.
    pub fn subscribe(&self, actor: &Actor, sandbox_id: &str) -> Result<ProgressSubscription> {
        let sandbox = self.inner.load(actor, sandbox_id)?;
        Ok(self.inner.progress.subscribe(&sandbox.id))
    }

    /// Current resource consumption of the sandbox's environment
    pub async fn resource_usage(&self, actor: &Actor, sandbox_id: &str) -> Result<ResourceUsage> {
        let inner = &self.inner;
        let sandbox = inner.load(actor, sandbox_id)?;
        let env = sandbox.environment_id.clone().ok_or_else(|| {
            GateError::InvalidTransition {
                from: sandbox.status().to_string(),
                to: "resource_usage".to_string(),
            }
        })?;
        let platform = inner.connectors.platform(sandbox.platform)?;
        with_timeout(
            "get_resource_usage",
            inner.config.timeouts.metadata(),
            platform.get_resource_usage(&env),
        )
        .await
    }
}
