//! Sync and submit-for-review
//!
//! A sync walks fixed stages and publishes each one on the sandbox's
//! progress channel. Pointers move only in the final transaction, so a
//! failure at any stage leaves the sandbox exactly as it was.

use std::time::Instant;

use changegate_core::errors::{ExError, ExErrorKind, GateError};
use changegate_core::model::{Actor, AppInfo, Change, NewChange, Sandbox, Snapshot};
use changegate_core::rules::ensure_owner_or_reviewer;
use changegate_core::log_op_start;
use changegate_store::SqliteRepo;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::{Inner, SandboxOrchestrator};
use crate::changes::{finish, new_id};
use crate::connectors::NotificationKind;
use crate::errors::{external, status_moved, with_timeout, Result};
use crate::progress::{ProgressStatus, Stage};

/// What a sync did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub sandbox: Sandbox,
    /// The detected change, if the export differed from the last snapshot
    pub change: Option<Change>,
    /// The platform revision was already recorded; nothing was written
    pub noop: bool,
}

impl SandboxOrchestrator {
    /// Export the sandbox branch, commit it and score what changed
    pub async fn sync(&self, actor: &Actor, sandbox_id: &str) -> Result<SyncOutcome> {
        let start = Instant::now();
        log_op_start!("sandbox_sync", sandbox_id = sandbox_id);

        let result = async {
            let sandbox = self.inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, "sync sandbox")?;
            let _guard = self.inner.claim(sandbox_id)?;
            self.inner.sync_locked(actor, sandbox, "sync").await
        }
        .await;
        finish("sandbox_sync", start, &result);
        result
    }

    /// Check for conflicts with trunk, sync, then move to PENDING_REVIEW
    ///
    /// Conflicts are detected before anything is exported or committed;
    /// unresolved conflicts and auto-blocked changes both refuse the submit.
    pub async fn submit(&self, actor: &Actor, sandbox_id: &str) -> Result<Sandbox> {
        let start = Instant::now();
        log_op_start!("sandbox_submit", sandbox_id = sandbox_id);

        let result = async {
            let sandbox = self.inner.load(actor, sandbox_id)?;
            ensure_owner_or_reviewer(actor, &sandbox, "submit sandbox")?;
            let _guard = self.inner.claim(sandbox_id)?;
            self.inner.submit_locked(actor, sandbox).await
        }
        .await;
        finish("sandbox_submit", start, &result);
        result
    }
}

impl Inner {
    pub(super) async fn sync_locked(
        &self,
        actor: &Actor,
        sandbox: Sandbox,
        operation: &str,
    ) -> Result<SyncOutcome> {
        let sandbox_id = sandbox.id.clone();
        let mut stage = Stage::Validating;
        match self.sync_stages(actor, sandbox, operation, &mut stage).await {
            Ok(outcome) => {
                let message = outcome.noop.then(|| "no new revision".to_string());
                self.progress.stage(
                    &sandbox_id,
                    operation,
                    Stage::Complete,
                    ProgressStatus::Completed,
                    message,
                );
                Ok(outcome)
            }
            Err(err) => {
                self.progress.stage(
                    &sandbox_id,
                    operation,
                    stage,
                    ProgressStatus::Failed,
                    Some(err.to_string()),
                );
                Err(err.with_stage(stage.as_str()))
            }
        }
    }

    async fn sync_stages(
        &self,
        actor: &Actor,
        mut sandbox: Sandbox,
        operation: &str,
        stage: &mut Stage,
    ) -> Result<SyncOutcome> {
        let sandbox_id = sandbox.id.clone();
        let mut enter = |next: Stage| {
            *stage = next;
            self.progress
                .stage(&sandbox_id, operation, next, ProgressStatus::Running, None);
        };
        enter(Stage::Validating);
        sandbox.ensure_accepts_edits("sync")?;
        let expected = sandbox.status();
        let app = self.sandbox_app(&sandbox).await?;
        let platform = self.connectors.platform(sandbox.platform)?;
        let platform_branch = required(&sandbox, sandbox.platform_branch.clone(), "platform_branch")?;
        let vcs_branch = required(&sandbox, sandbox.vcs_branch.clone(), "vcs_branch")?;
        let timeouts = &self.config.timeouts;
        with_timeout(
            "validate_credentials",
            timeouts.metadata(),
            platform.validate_credentials(&app),
        )
        .await?;

        enter(Stage::VerifyingBranch);
        let exists = with_timeout(
            "branch_exists",
            timeouts.metadata(),
            platform.branch_exists(&app, &platform_branch),
        )
        .await?;
        if !exists {
            return Err(external(
                "branch_exists",
                format!("platform branch '{}' no longer exists", platform_branch),
            ));
        }

        enter(Stage::Exporting);
        let snapshot = with_timeout(
            "export_snapshot",
            timeouts.export(),
            platform.export_snapshot(&app, &platform_branch),
        )
        .await?;
        let revision = snapshot
            .revision
            .clone()
            .unwrap_or_else(|| snapshot.digest());
        if sandbox.is_sync_noop(&revision) {
            return Ok(SyncOutcome {
                sandbox,
                change: None,
                noop: true,
            });
        }

        enter(Stage::Uploading);
        let message = format!("Sync sandbox {} at revision {}", sandbox.id, revision);
        let commit = with_timeout(
            "commit_snapshot",
            timeouts.commit(),
            self.connectors
                .vcs
                .commit_snapshot(&app.repository, &vcs_branch, &snapshot, &message),
        )
        .await?;

        enter(Stage::Committing);
        let head = with_timeout(
            "branch_head",
            timeouts.metadata(),
            self.connectors.vcs.branch_head(&app.repository, &vcs_branch),
        )
        .await?;
        if head != commit {
            return Err(external(
                "branch_head",
                format!("branch '{}' is at {} after committing {}", vcs_branch, head, commit),
            ));
        }

        enter(Stage::DetectingChanges);
        let change = self
            .detect_change(actor, &sandbox, &app, snapshot.clone(), &revision)
            .await?;
        sandbox.record_sync(revision, commit, snapshot, Utc::now())?;

        let keep_history = self.config.assessment_history;
        let written = self.db.transaction(|tx| {
            let written = SqliteRepo::record_sync(tx, &sandbox, expected, change.as_ref())?;
            if written && keep_history {
                if let Some(change) = &change {
                    if let Some(assessment) = &change.risk_assessment {
                        SqliteRepo::write_assessment(tx, &change.id, assessment, change.status, true)?;
                    }
                }
            }
            Ok(written)
        })?;
        if !written {
            return Err(status_moved(&sandbox.id));
        }

        self.audit(
            &actor.user_id,
            "sandbox.sync",
            &sandbox,
            Some(expected),
            Some(json!({
                "revision": sandbox.latest_revision,
                "commit": sandbox.latest_commit,
                "change_id": change.as_ref().map(|c| c.id.clone()),
                "risk_score": change.as_ref().and_then(|c| c.risk_assessment.as_ref()).map(|a| a.score),
            })),
        )
        .await;
        Ok(SyncOutcome {
            sandbox,
            change,
            noop: false,
        })
    }

    /// Diff against the last recorded snapshot and score the result
    async fn detect_change(
        &self,
        actor: &Actor,
        sandbox: &Sandbox,
        app: &AppInfo,
        after: Snapshot,
        revision: &str,
    ) -> Result<Option<Change>> {
        let before = sandbox
            .last_snapshot
            .clone()
            .unwrap_or_else(Snapshot::empty);
        let mut change = Change::new(
            new_id(),
            NewChange {
                app_id: app.id.clone(),
                organization_id: sandbox.organization_id.clone(),
                sandbox_id: Some(sandbox.id.clone()),
                author_id: Some(actor.user_id.clone()),
                title: format!("{} @ {}", sandbox.name, revision),
                before_snapshot: before,
                after_snapshot: after,
                before_code: None,
                after_code: None,
            },
        )?;
        if change.diff_result.is_empty() {
            return Ok(None);
        }
        let assessment = self.pipeline.assess(&change, sandbox.platform).await;
        change.apply_assessment(assessment);
        Ok(Some(change))
    }

    async fn submit_locked(&self, actor: &Actor, mut sandbox: Sandbox) -> Result<Sandbox> {
        sandbox.ensure_submittable()?;
        let app = self.sandbox_app(&sandbox).await?;

        self.progress.stage(
            &sandbox.id,
            "submit",
            Stage::CheckingConflicts,
            ProgressStatus::Running,
            None,
        );
        let expected = sandbox.status();
        let conflicts = match self.conflicting_paths(&sandbox, &app).await {
            Ok(paths) => paths,
            Err(err) => {
                self.progress.stage(
                    &sandbox.id,
                    "submit",
                    Stage::CheckingConflicts,
                    ProgressStatus::Failed,
                    Some(err.to_string()),
                );
                return Err(err.with_stage(Stage::CheckingConflicts.as_str()));
            }
        };
        match conflicts {
            Some(paths) if !paths.is_empty() => {
                sandbox.mark_conflicts(paths.clone());
                self.persist(&sandbox, expected)?;
                self.audit(
                    &actor.user_id,
                    "sandbox.conflict_detected",
                    &sandbox,
                    Some(expected),
                    Some(json!({ "paths": paths })),
                )
                .await;
                self.notify(
                    &sandbox.created_by_id,
                    NotificationKind::ConflictDetected,
                    &sandbox.id,
                    format!("Sandbox '{}' conflicts with trunk in {} path(s)", sandbox.name, paths.len()),
                )
                .await;
                self.progress.stage(
                    &sandbox.id,
                    "submit",
                    Stage::CheckingConflicts,
                    ProgressStatus::Failed,
                    Some("conflicts with trunk".to_string()),
                );
                return Err(GateError::ConflictUnresolved {
                    sandbox_id: sandbox.id.clone(),
                    paths,
                }
                .into());
            }
            Some(_) => {
                sandbox.mark_potential_conflict();
                self.persist(&sandbox, expected)?;
            }
            None => {}
        }

        let outcome = self.sync_locked(actor, sandbox, "submit").await?;
        let mut sandbox = outcome.sandbox;

        let blocked = self.blocked_rules(&sandbox.id)?;
        if !blocked.is_empty() {
            return Err(GateError::AutoBlocked {
                sandbox_id: sandbox.id.clone(),
                rules: blocked,
            }
            .into());
        }

        let expected = sandbox.status();
        sandbox.submit_for_review()?;
        self.persist(&sandbox, expected)?;
        self.audit(&actor.user_id, "sandbox.submit", &sandbox, Some(expected), None)
            .await;
        self.notify_reviewers(
            &sandbox,
            NotificationKind::ReviewRequested,
            &format!("Sandbox '{}' is ready for review", sandbox.name),
        )
        .await;
        Ok(sandbox)
    }

    /// Paths changed on both trunk and the sandbox since the base commit
    ///
    /// `None` when trunk has not moved, `Some(empty)` when it moved without
    /// overlap.
    async fn conflicting_paths(&self, sandbox: &Sandbox, app: &AppInfo) -> Result<Option<Vec<String>>> {
        let base = required(sandbox, sandbox.base_commit.clone(), "base_commit")?;
        let metadata = self.config.timeouts.metadata();
        let vcs = &self.connectors.vcs;

        let trunk_head = with_timeout(
            "branch_head",
            metadata,
            vcs.branch_head(&app.repository, &app.trunk_branch),
        )
        .await?;
        if trunk_head == base {
            return Ok(None);
        }
        let trunk_diff = with_timeout(
            "compare_commits",
            metadata,
            vcs.compare_commits(&app.repository, &base, &trunk_head),
        )
        .await?;

        let sandbox_head = sandbox.latest_commit.clone().unwrap_or_else(|| base.clone());
        let sandbox_diff = if sandbox_head == base {
            Vec::new()
        } else {
            with_timeout(
                "compare_commits",
                metadata,
                vcs.compare_commits(&app.repository, &base, &sandbox_head),
            )
            .await?
        };
        Ok(Some(
            self.connectors
                .conflicts
                .conflicting_paths(&trunk_diff, &sandbox_diff),
        ))
    }

    /// Auto-block rules of the sandbox's outstanding blocked changes
    pub(super) fn blocked_rules(&self, sandbox_id: &str) -> Result<Vec<String>> {
        self.db.with(|conn| {
            let mut rules = Vec::new();
            for id in SqliteRepo::blocked_change_ids(conn, sandbox_id)? {
                let change = SqliteRepo::get_change(conn, &id)?;
                let change_rules = change
                    .and_then(|c| c.risk_assessment)
                    .map(|a| a.auto_block_rules)
                    .unwrap_or_default();
                if change_rules.is_empty() {
                    rules.push(id);
                }
                for rule in change_rules {
                    if !rules.contains(&rule) {
                        rules.push(rule);
                    }
                }
            }
            Ok(rules)
        })
    }
}

fn required(sandbox: &Sandbox, value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| {
        ExError::new(ExErrorKind::Internal)
            .with_entity_id(&sandbox.id)
            .with_message(format!("active sandbox is missing {}", field))
    })
}
