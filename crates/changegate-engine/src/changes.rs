//! Change operations
//!
//! Authoring, editing and re-scoring changes outside the sandbox sync
//! flow. Every write re-runs the risk pipeline so the stored assessment
//! always matches the stored diff.

use std::sync::Arc;
use std::time::Instant;

use changegate_core::diff::TextFormat;
use changegate_core::errors::{ExError, GateError};
use changegate_core::model::{Actor, AppInfo, Change, ChangeState, ChangeStatus, NewChange, Snapshot};
use changegate_core::rules::{ensure_author_or_reviewer, ensure_change_visible};
use changegate_core::{log_op_end, log_op_error, log_op_start};
use changegate_store::{AuditEntry, ChangeFilter, SharedConnection, SqliteRepo};
use chrono::Utc;
use serde_json::json;

use crate::commands::engine_query::{load_change, render_change_diff};
use crate::config::TimeoutConfig;
use crate::connectors::{AuditSink, Catalog};
use crate::errors::{with_timeout, Result};
use crate::pipeline::AssessmentPipeline;

/// A change authored directly rather than detected by a sync
#[derive(Debug, Clone)]
pub struct ChangeDraft {
    pub app_id: String,
    pub title: String,
    pub before_snapshot: Snapshot,
    pub after_snapshot: Snapshot,
    pub before_code: Option<String>,
    pub after_code: Option<String>,
}

/// Fields to replace on an existing change; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct ChangeEdit {
    pub title: Option<String>,
    pub before_snapshot: Option<Snapshot>,
    pub after_snapshot: Option<Snapshot>,
    pub before_code: Option<String>,
    pub after_code: Option<String>,
}

/// Listing options scoped to the caller's organization
#[derive(Debug, Clone, Default)]
pub struct ChangeQuery {
    pub app_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub include_undone: bool,
}

#[derive(Clone)]
pub struct ChangeService {
    db: SharedConnection,
    catalog: Arc<dyn Catalog>,
    audit: Arc<dyn AuditSink>,
    pipeline: AssessmentPipeline,
    timeouts: TimeoutConfig,
    keep_history: bool,
}

impl ChangeService {
    pub fn new(
        db: SharedConnection,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
        pipeline: AssessmentPipeline,
        timeouts: TimeoutConfig,
        keep_history: bool,
    ) -> Self {
        Self {
            db,
            catalog,
            audit,
            pipeline,
            timeouts,
            keep_history,
        }
    }

    /// Diff `current` against the app's latest recorded state
    ///
    /// Returns `None` when nothing changed. Otherwise the detected change
    /// is scored and stored.
    pub async fn detect(
        &self,
        actor: &Actor,
        app_id: &str,
        current: Snapshot,
    ) -> Result<Option<Change>> {
        let start = Instant::now();
        log_op_start!("change_detect", app_id = app_id);

        let result = self.detect_inner(actor, app_id, current).await;
        finish("change_detect", start, &result);
        result
    }

    async fn detect_inner(
        &self,
        actor: &Actor,
        app_id: &str,
        current: Snapshot,
    ) -> Result<Option<Change>> {
        let app = self.app_for(actor, app_id).await?;
        let previous = self.db.with(|conn| {
            SqliteRepo::list_changes(
                conn,
                &ChangeFilter {
                    organization_id: Some(actor.organization_id.clone()),
                    app_id: Some(app_id.to_string()),
                    ..ChangeFilter::default()
                },
            )
        })?;
        let before = previous
            .last()
            .map(|c| c.after_snapshot.clone())
            .unwrap_or_else(Snapshot::empty);

        let label = current
            .revision
            .clone()
            .unwrap_or_else(|| current.digest().chars().take(12).collect());
        let change = Change::new(
            new_id(),
            NewChange {
                app_id: app.id.clone(),
                organization_id: actor.organization_id.clone(),
                sandbox_id: None,
                author_id: Some(actor.user_id.clone()),
                title: format!("Detected changes at {}", label),
                before_snapshot: before,
                after_snapshot: current,
                before_code: None,
                after_code: None,
            },
        )?;
        if change.diff_result.is_empty() {
            return Ok(None);
        }
        self.score_and_insert(actor, change, &app).await.map(Some)
    }

    /// Author a change between two snapshots
    pub async fn create(&self, actor: &Actor, draft: ChangeDraft) -> Result<Change> {
        let start = Instant::now();
        log_op_start!("change_create", app_id = %draft.app_id);

        let result = async {
            let app = self.app_for(actor, &draft.app_id).await?;
            let change = Change::new(
                new_id(),
                NewChange {
                    app_id: draft.app_id,
                    organization_id: actor.organization_id.clone(),
                    sandbox_id: None,
                    author_id: Some(actor.user_id.clone()),
                    title: draft.title,
                    before_snapshot: draft.before_snapshot,
                    after_snapshot: draft.after_snapshot,
                    before_code: draft.before_code,
                    after_code: draft.after_code,
                },
            )?;
            self.score_and_insert(actor, change, &app).await
        }
        .await;
        finish("change_create", start, &result);
        result
    }

    /// Edit title, snapshots or code; the diff and assessment are recomputed
    pub async fn update(&self, actor: &Actor, change_id: &str, edit: ChangeEdit) -> Result<Change> {
        let start = Instant::now();
        log_op_start!("change_update", change_id = change_id);

        let result = async {
            let mut change = self.load_for_write(actor, change_id, "update change")?;
            if let Some(title) = edit.title {
                if title.trim().is_empty() {
                    return Err(GateError::InvalidInput {
                        field: "title".to_string(),
                        reason: "must not be empty".to_string(),
                    }
                    .into());
                }
                change.title = title;
            }
            if edit.before_code.is_some() {
                change.before_code = edit.before_code;
            }
            if edit.after_code.is_some() {
                change.after_code = edit.after_code;
            }
            if edit.before_snapshot.is_some() || edit.after_snapshot.is_some() {
                self.ensure_gate_released(&change)?;
                let before = edit
                    .before_snapshot
                    .unwrap_or_else(|| change.before_snapshot.clone());
                let after = edit
                    .after_snapshot
                    .unwrap_or_else(|| change.after_snapshot.clone());
                change.set_snapshots(before, after);
            }
            change.updated_at = Utc::now();

            let app = self.app_for(actor, &change.app_id).await?;
            let assessment = self.pipeline.assess(&change, app.platform).await;
            change.apply_assessment(assessment);

            self.db.transaction(|tx| {
                SqliteRepo::update_change(tx, &change)?;
                if self.keep_history {
                    if let Some(assessment) = &change.risk_assessment {
                        SqliteRepo::write_assessment(tx, &change.id, assessment, change.status, true)?;
                    }
                }
                Ok(())
            })?;
            self.audit(actor, "change.update", &change, None).await;
            Ok(change)
        }
        .await;
        finish("change_update", start, &result);
        result
    }

    /// Remove a change permanently
    pub async fn delete(&self, actor: &Actor, change_id: &str) -> Result<()> {
        let start = Instant::now();
        log_op_start!("change_delete", change_id = change_id);

        let result = async {
            let change = self.load_visible(actor, change_id)?;
            ensure_author_or_reviewer(actor, &change, "delete change")?;
            self.ensure_gate_released(&change)?;
            self.db
                .with(|conn| SqliteRepo::delete_change(conn, change_id))?;
            self.audit(actor, "change.delete", &change, Some("DELETED")).await;
            Ok(())
        }
        .await;
        finish("change_delete", start, &result);
        result
    }

    /// Soft delete: the change stays stored but leaves listings and gates
    pub async fn undo(&self, actor: &Actor, change_id: &str) -> Result<Change> {
        self.set_state(actor, change_id, "change_undo", |c| c.undo())
            .await
    }

    /// Reverse an undo
    pub async fn restore(&self, actor: &Actor, change_id: &str) -> Result<Change> {
        self.set_state(actor, change_id, "change_restore", |c| c.restore())
            .await
    }

    async fn set_state(
        &self,
        actor: &Actor,
        change_id: &str,
        op: &'static str,
        apply: impl FnOnce(&mut Change) -> changegate_core::Result<()>,
    ) -> Result<Change> {
        let start = Instant::now();
        log_op_start!(op, change_id = change_id);

        let result = async {
            let mut change = self.load_visible(actor, change_id)?;
            ensure_author_or_reviewer(actor, &change, op)?;
            if change.state == ChangeState::Active {
                self.ensure_gate_released(&change)?;
            }
            let before = change.state;
            apply(&mut change)?;
            self.db.with(|conn| {
                SqliteRepo::set_change_state(conn, &change.id, change.state, change.updated_at)
            })?;
            self.audit_transition(actor, op, &change, before, change.state)
                .await;
            Ok(change)
        }
        .await;
        finish(op, start, &result);
        result
    }

    pub fn get(&self, actor: &Actor, change_id: &str) -> Result<Change> {
        self.load_visible(actor, change_id)
    }

    pub fn list(&self, actor: &Actor, query: &ChangeQuery) -> Result<Vec<Change>> {
        self.db.with(|conn| {
            SqliteRepo::list_changes(
                conn,
                &ChangeFilter {
                    organization_id: Some(actor.organization_id.clone()),
                    app_id: query.app_id.clone(),
                    sandbox_id: query.sandbox_id.clone(),
                    include_undone: query.include_undone,
                },
            )
        })
    }

    /// Render the diff as structured JSON, HTML or unified text
    pub fn get_diff(&self, actor: &Actor, change_id: &str, format: TextFormat) -> Result<String> {
        let change = self.load_visible(actor, change_id)?;
        render_change_diff(&change, format)
    }

    /// Re-run the pipeline and overwrite the stored assessment
    pub async fn rescore(&self, actor: &Actor, change_id: &str) -> Result<Change> {
        let start = Instant::now();
        log_op_start!("change_rescore", change_id = change_id);

        let result = async {
            let mut change = self.load_for_write(actor, change_id, "rescore change")?;
            let app = self.app_for(actor, &change.app_id).await?;
            let assessment = self.pipeline.assess(&change, app.platform).await;
            change.apply_assessment(assessment);
            self.write_assessment(&change)?;
            self.audit(actor, "change.rescore", &change, None).await;
            Ok(change)
        }
        .await;
        finish("change_rescore", start, &result);
        result
    }

    fn write_assessment(&self, change: &Change) -> Result<()> {
        let Some(assessment) = &change.risk_assessment else {
            return Ok(());
        };
        if self.keep_history {
            self.db.transaction(|tx| {
                SqliteRepo::write_assessment(tx, &change.id, assessment, change.status, true)
            })
        } else {
            self.db.with(|conn| {
                SqliteRepo::write_assessment(conn, &change.id, assessment, change.status, false)
            })
        }
    }

    async fn score_and_insert(&self, actor: &Actor, mut change: Change, app: &AppInfo) -> Result<Change> {
        let assessment = self.pipeline.assess(&change, app.platform).await;
        change.apply_assessment(assessment);
        self.db.transaction(|tx| {
            SqliteRepo::insert_change(tx, &change)?;
            if self.keep_history {
                if let Some(assessment) = &change.risk_assessment {
                    SqliteRepo::write_assessment(tx, &change.id, assessment, change.status, true)?;
                }
            }
            Ok(())
        })?;
        self.audit(actor, "change.create", &change, None).await;
        Ok(change)
    }

    async fn app_for(&self, actor: &Actor, app_id: &str) -> Result<AppInfo> {
        let app = with_timeout(
            "get_app",
            self.timeouts.metadata(),
            self.catalog.get_app(app_id),
        )
        .await?;
        match app {
            Some(app) if app.organization_id == actor.organization_id => Ok(app),
            _ => Err(GateError::AppNotFound {
                app_id: app_id.to_string(),
            }
            .into()),
        }
    }

    fn load_visible(&self, actor: &Actor, change_id: &str) -> Result<Change> {
        let change = self.db.with(|conn| load_change(conn, change_id))?;
        ensure_change_visible(actor, &change)?;
        Ok(change)
    }

    fn load_for_write(&self, actor: &Actor, change_id: &str, action: &str) -> Result<Change> {
        let change = self.load_visible(actor, change_id)?;
        ensure_author_or_reviewer(actor, &change, action)?;
        if change.state == ChangeState::Undone {
            return Err(GateError::ChangeAlreadyUndone {
                change_id: change.id.clone(),
            }
            .into());
        }
        Ok(change)
    }

    /// A blocked change holds its sandbox's gate until the sandbox closes
    ///
    /// Its content stays on the branch however the row is edited, so it may
    /// not be deleted, undone or re-pointed at other snapshots meanwhile.
    /// Rescoring stays open: a resolved policy clears the block that way.
    fn ensure_gate_released(&self, change: &Change) -> Result<()> {
        if change.status != ChangeStatus::Blocked {
            return Ok(());
        }
        let Some(sandbox_id) = &change.sandbox_id else {
            return Ok(());
        };
        let sandbox = self.db.with(|conn| SqliteRepo::get_sandbox(conn, sandbox_id))?;
        let Some(sandbox) = sandbox.filter(|s| !s.status().is_terminal()) else {
            return Ok(());
        };
        let rules = change
            .risk_assessment
            .as_ref()
            .map(|a| a.auto_block_rules.clone())
            .unwrap_or_default();
        Err(GateError::AutoBlocked {
            sandbox_id: sandbox.id,
            rules,
        }
        .into())
    }

    async fn audit(&self, actor: &Actor, action: &str, change: &Change, after: Option<&str>) {
        let entry = AuditEntry::new(&actor.user_id, action, "change", &change.id)
            .with_states(None, Some(after.unwrap_or(change.status.as_str())))
            .with_details(json!({
                "risk_score": change.risk_assessment.as_ref().map(|a| a.score),
                "total_changes": change.diff_result.total_changes,
            }));
        record_audit(self.audit.as_ref(), entry).await;
    }

    async fn audit_transition(
        &self,
        actor: &Actor,
        op: &str,
        change: &Change,
        before: ChangeState,
        after: ChangeState,
    ) {
        let action = op.replacen('_', ".", 1);
        let entry = AuditEntry::new(&actor.user_id, action, "change", &change.id)
            .with_states(Some(before.as_str()), Some(after.as_str()));
        record_audit(self.audit.as_ref(), entry).await;
    }
}

impl std::fmt::Debug for ChangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeService")
            .field("keep_history", &self.keep_history)
            .finish_non_exhaustive()
    }
}

/// Audit failures are logged, never surfaced; the action already happened
pub(crate) async fn record_audit(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    if let Err(err) = sink.record(entry).await {
        tracing::error!(action = %action, error = %err, "failed to write audit entry");
    }
}

pub(crate) fn finish<T>(op: &str, start: Instant, result: &Result<T>) {
    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(_) => log_op_end!(op, duration_ms = duration_ms),
        Err(err) => log_op_error!(op, ExError::clone(err), duration_ms = duration_ms),
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
