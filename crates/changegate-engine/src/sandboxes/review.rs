//! Review decisions, conflict resolution and abandon

use std::time::Instant;

use changegate_core::errors::GateError;
use changegate_core::model::{
    Actor, ChangeStatus, ConflictResolution, ResolutionStrategy, Sandbox, SandboxStatus,
};
use changegate_core::rules::{ensure_owner_or_reviewer, ensure_reviewer};
use changegate_core::log_op_start;
use changegate_store::{ChangeFilter, SqliteRepo};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Inner, SandboxOrchestrator};
use crate::changes::finish;
use crate::connectors::NotificationKind;
use crate::errors::{with_timeout, Result};

/// A reviewer's verdict on a PENDING_REVIEW sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
    Reject,
}

impl ReviewDecision {
    fn target(&self) -> SandboxStatus {
        match self {
            ReviewDecision::Approve => SandboxStatus::Merged,
            ReviewDecision::RequestChanges => SandboxStatus::ChangesRequested,
            ReviewDecision::Reject => SandboxStatus::Rejected,
        }
    }
}

impl SandboxOrchestrator {
    /// Approve, request changes on, or reject a submitted sandbox
    ///
    /// Approval is refused while any outstanding change is auto-blocked.
    /// Merging only records the decision; promotion of the branch happens
    /// outside the engine.
    pub async fn review(
        &self,
        actor: &Actor,
        sandbox_id: &str,
        decision: ReviewDecision,
        comment: Option<String>,
    ) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_review", sandbox_id = sandbox_id, decision = ?decision);

        let result = async {
            ensure_reviewer(actor, "review sandbox")?;
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            if sandbox.status() != SandboxStatus::PendingReview {
                return Err(GateError::InvalidTransition {
                    from: sandbox.status().to_string(),
                    to: decision.target().to_string(),
                }
                .into());
            }
            if decision == ReviewDecision::Approve {
                let blocked = inner.blocked_rules(sandbox_id)?;
                if !blocked.is_empty() {
                    return Err(GateError::AutoBlocked {
                        sandbox_id: sandbox_id.to_string(),
                        rules: blocked,
                    }
                    .into());
                }
            }

            let before = sandbox.transition_to(decision.target())?;
            inner.persist(&sandbox, before)?;
            match decision {
                ReviewDecision::Approve => inner.settle_changes(&sandbox, ChangeStatus::Approved)?,
                ReviewDecision::Reject => inner.settle_changes(&sandbox, ChangeStatus::Rejected)?,
                ReviewDecision::RequestChanges => {}
            }
            inner
                .audit(
                    &actor.user_id,
                    "sandbox.review",
                    &sandbox,
                    Some(before),
                    Some(json!({ "decision": decision, "comment": comment })),
                )
                .await;

            let (kind, verb) = match decision {
                ReviewDecision::Approve => (NotificationKind::Merged, "was merged"),
                ReviewDecision::RequestChanges => {
                    (NotificationKind::ChangesRequested, "needs changes")
                }
                ReviewDecision::Reject => (NotificationKind::Rejected, "was rejected"),
            };
            let mut message = format!("Sandbox '{}' {}", sandbox.name, verb);
            if let Some(comment) = &comment {
                message.push_str(": ");
                message.push_str(comment);
            }
            inner
                .notify(&sandbox.created_by_id, kind, &sandbox.id, message)
                .await;

            if sandbox.status().is_terminal() {
                let app = inner.sandbox_app(&sandbox).await.ok();
                let drop_branches = decision == ReviewDecision::Reject;
                inner
                    .release_resources(&sandbox, app.as_ref(), drop_branches)
                    .await;
            }
            Ok(sandbox)
        }
        .await;
        finish("sandbox_review", start, &result);
        result
    }

    /// Record how a reviewer settled a conflict with trunk
    ///
    /// The sandbox's base commit moves to trunk's current head, so the next
    /// submit only compares against trunk changes made after this point.
    pub async fn resolve_conflict(
        &self,
        actor: &Actor,
        sandbox_id: &str,
        strategy: ResolutionStrategy,
        notes: Option<String>,
    ) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_resolve_conflict", sandbox_id = sandbox_id);

        let result = async {
            ensure_reviewer(actor, "resolve conflict")?;
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            let app = inner.sandbox_app(&sandbox).await?;
            let trunk_head = with_timeout(
                "branch_head",
                inner.config.timeouts.metadata(),
                inner
                    .connectors
                    .vcs
                    .branch_head(&app.repository, &app.trunk_branch),
            )
            .await?;

            let before = sandbox.status();
            sandbox.resolve_conflict(ConflictResolution {
                resolved_by: actor.user_id.clone(),
                resolved_at: Utc::now(),
                strategy,
                notes,
                paths: Vec::new(),
            })?;
            sandbox.base_commit = Some(trunk_head);
            inner.persist(&sandbox, before)?;

            let paths = sandbox
                .conflict_resolution
                .as_ref()
                .map(|r| r.paths.clone())
                .unwrap_or_default();
            inner
                .audit(
                    &actor.user_id,
                    "sandbox.resolve_conflict",
                    &sandbox,
                    Some(before),
                    Some(json!({ "strategy": strategy, "paths": paths })),
                )
                .await;
            inner
                .notify(
                    &sandbox.created_by_id,
                    NotificationKind::ConflictResolved,
                    &sandbox.id,
                    format!("Conflicts in sandbox '{}' were resolved", sandbox.name),
                )
                .await;
            Ok(sandbox)
        }
        .await;
        finish("sandbox_resolve_conflict", start, &result);
        result
    }

    /// Give up on a sandbox from any non-terminal status
    pub async fn abandon(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_abandon", sandbox_id = sandbox_id);

        let result = async {
            let inner = &self.inner;
            let mut sandbox = inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, "abandon sandbox")?;
            let before = sandbox.transition_to(SandboxStatus::Abandoned)?;
            inner.persist(&sandbox, before)?;

            let app = inner.sandbox_app(&sandbox).await.ok();
            inner.release_resources(&sandbox, app.as_ref(), true).await;

            inner
                .audit(&actor.user_id, "sandbox.abandon", &sandbox, Some(before), None)
                .await;
            if !sandbox.is_owned_by(&actor.user_id) {
                inner
                    .notify(
                        &sandbox.created_by_id,
                        NotificationKind::Abandoned,
                        &sandbox.id,
                        format!("Sandbox '{}' was abandoned by {}", sandbox.name, actor.user_id),
                    )
                    .await;
            }
            Ok(sandbox)
        }
        .await;
        finish("sandbox_abandon", start, &result);
        result
    }
}

impl Inner {
    /// Stamp the sandbox's outstanding changes with the review outcome
    fn settle_changes(&self, sandbox: &Sandbox, status: ChangeStatus) -> Result<()> {
        let filter = ChangeFilter {
            sandbox_id: Some(sandbox.id.clone()),
            ..ChangeFilter::default()
        };
        self.db.transaction(|tx| {
            for mut change in SqliteRepo::list_changes(tx, &filter)? {
                if change.is_outstanding() {
                    change.status = status;
                    change.updated_at = Utc::now();
                    SqliteRepo::update_change(tx, &change)?;
                }
            }
            Ok(())
        })
    }
}
