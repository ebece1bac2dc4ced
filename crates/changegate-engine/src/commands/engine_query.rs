//! Engine-level read-only query surface.
//!
//! `apply_engine_query` is the single entry point for read-only queries
//! that span the store and core layers. It takes a shared connection and
//! never writes, so the CLI can use it without any connectors.

use changegate_core::diff::{render_human_summary, render_text_diff, TextFormat};
use changegate_core::errors::{ExError, ExErrorKind};
use changegate_core::model::{Change, Sandbox};
use changegate_core::risk::RiskAssessment;
use changegate_core::sandbox::{compute_stats, SandboxStats};
use changegate_core::{log_op_end, log_op_error, log_op_start};
use changegate_store::errors::row_not_found;
use changegate_store::{AuditEntry, ChangeFilter, SandboxFilter, SqliteRepo};
use chrono::Utc;
use rusqlite::Connection;

use crate::errors::Result;

/// Read-only queries supported by the engine.
#[derive(Debug, Clone)]
pub enum EngineQuery {
    /// Get one sandbox by id.
    SandboxGet { sandbox_id: String },
    /// List sandboxes matching a filter.
    SandboxList(SandboxFilter),
    /// Aggregate counts for one organization.
    SandboxStats {
        organization_id: String,
        /// "Expiring soon" horizon
        window_days: u32,
    },
    /// Get one change by id, including undone ones.
    ChangeGet { change_id: String },
    /// List changes matching a filter.
    ChangeList(ChangeFilter),
    /// Render a change's diff.
    ChangeDiff { change_id: String, format: TextFormat },
    /// Markdown overview of a change's structured diff.
    ChangeSummary { change_id: String },
    /// Logged assessments, oldest first.
    AssessmentHistory { change_id: String },
    /// Audit trail of one entity.
    AuditTrail {
        entity_type: String,
        entity_id: String,
    },
}

impl EngineQuery {
    fn op_name(&self) -> &'static str {
        match self {
            EngineQuery::SandboxGet { .. } => "sandbox_get",
            EngineQuery::SandboxList(_) => "sandbox_list",
            EngineQuery::SandboxStats { .. } => "sandbox_stats",
            EngineQuery::ChangeGet { .. } => "change_get",
            EngineQuery::ChangeList(_) => "change_list",
            EngineQuery::ChangeDiff { .. } => "change_diff",
            EngineQuery::ChangeSummary { .. } => "change_summary",
            EngineQuery::AssessmentHistory { .. } => "assessment_history",
            EngineQuery::AuditTrail { .. } => "audit_trail",
        }
    }
}

/// Result of a read-only engine query.
#[derive(Debug, Clone)]
pub enum EngineQueryResult {
    Sandbox(Sandbox),
    Sandboxes(Vec<Sandbox>),
    Stats(SandboxStats),
    Change(Box<Change>),
    Changes(Vec<Change>),
    Rendered(String),
    Assessments(Vec<RiskAssessment>),
    Audit(Vec<AuditEntry>),
}

/// Execute a read-only query against the store.
pub fn apply_engine_query(query: EngineQuery, conn: &Connection) -> Result<EngineQueryResult> {
    let op = query.op_name();
    let start = std::time::Instant::now();
    log_op_start!(op);

    let result = run_query(query, conn);
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => log_op_end!(op, duration_ms = duration_ms),
        Err(err) => log_op_error!(op, err.clone(), duration_ms = duration_ms),
    }
    result
}

fn run_query(query: EngineQuery, conn: &Connection) -> Result<EngineQueryResult> {
    match query {
        EngineQuery::SandboxGet { sandbox_id } => {
            load_sandbox(conn, &sandbox_id).map(EngineQueryResult::Sandbox)
        }
        EngineQuery::SandboxList(filter) => {
            SqliteRepo::list_sandboxes(conn, &filter).map(EngineQueryResult::Sandboxes)
        }
        EngineQuery::SandboxStats {
            organization_id,
            window_days,
        } => {
            let sandboxes =
                SqliteRepo::list_sandboxes(conn, &SandboxFilter::organization(organization_id))?;
            Ok(EngineQueryResult::Stats(compute_stats(
                &sandboxes,
                Utc::now(),
                window_days,
            )))
        }
        EngineQuery::ChangeGet { change_id } => load_change(conn, &change_id)
            .map(Box::new)
            .map(EngineQueryResult::Change),
        EngineQuery::ChangeList(filter) => {
            SqliteRepo::list_changes(conn, &filter).map(EngineQueryResult::Changes)
        }
        EngineQuery::ChangeDiff { change_id, format } => {
            let change = load_change(conn, &change_id)?;
            render_change_diff(&change, format).map(EngineQueryResult::Rendered)
        }
        EngineQuery::ChangeSummary { change_id } => {
            let change = load_change(conn, &change_id)?;
            Ok(EngineQueryResult::Rendered(render_human_summary(
                &change.diff_result,
            )))
        }
        EngineQuery::AssessmentHistory { change_id } => {
            load_change(conn, &change_id)?;
            SqliteRepo::assessment_history(conn, &change_id).map(EngineQueryResult::Assessments)
        }
        EngineQuery::AuditTrail {
            entity_type,
            entity_id,
        } => SqliteRepo::list_audit(conn, &entity_type, &entity_id).map(EngineQueryResult::Audit),
    }
}

/// Load a sandbox or fail with `NotFound`
pub fn load_sandbox(conn: &Connection, sandbox_id: &str) -> Result<Sandbox> {
    SqliteRepo::get_sandbox(conn, sandbox_id)?.ok_or_else(|| row_not_found("sandboxes", sandbox_id))
}

/// Load a change or fail with `NotFound`
pub fn load_change(conn: &Connection, change_id: &str) -> Result<Change> {
    SqliteRepo::get_change(conn, change_id)?.ok_or_else(|| row_not_found("changes", change_id))
}

/// Render a change's diff
///
/// `Json` yields the structured diff. `Html` and `Text` align lines of
/// the changed code when the change carries code, otherwise of the
/// pretty-printed snapshots.
pub fn render_change_diff(change: &Change, format: TextFormat) -> Result<String> {
    if format == TextFormat::Json {
        return serde_json::to_string_pretty(&change.diff_result).map_err(ExError::from);
    }

    let (before, after) = if change.has_code() {
        (
            change.before_code.clone().unwrap_or_default(),
            change.after_code.clone().unwrap_or_default(),
        )
    } else {
        (
            pretty(&change.before_snapshot.document)?,
            pretty(&change.after_snapshot.document)?,
        )
    };
    Ok(render_text_diff(&before, &after, format)?)
}

fn pretty(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        ExError::new(ExErrorKind::Serialization)
            .with_op("render_change_diff")
            .with_message(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use changegate_core::model::{NewChange, Snapshot};
    use changegate_store::SharedConnection;
    use serde_json::json;

    fn stored_change(db: &SharedConnection) -> Change {
        let change = Change::new(
            "ch-1".into(),
            NewChange {
                app_id: "app-1".into(),
                organization_id: "org-1".into(),
                sandbox_id: None,
                author_id: None,
                title: "Add screen".into(),
                before_snapshot: Snapshot::new(json!({"screens": ["Home"]})),
                after_snapshot: Snapshot::new(json!({"screens": ["Home", "Login"]})),
                before_code: None,
                after_code: None,
            },
        )
        .unwrap();
        db.with(|conn| SqliteRepo::insert_change(conn, &change))
            .unwrap();
        change
    }

    #[test]
    fn test_change_diff_formats() {
        let db = SharedConnection::in_memory().unwrap();
        stored_change(&db);

        let rendered = |format| {
            db.with(|conn| {
                match apply_engine_query(
                    EngineQuery::ChangeDiff {
                        change_id: "ch-1".into(),
                        format,
                    },
                    conn,
                )? {
                    EngineQueryResult::Rendered(text) => Ok(text),
                    other => panic!("unexpected result {:?}", other),
                }
            })
            .unwrap()
        };

        let structured: serde_json::Value =
            serde_json::from_str(&rendered(TextFormat::Json)).unwrap();
        assert_eq!(structured["total_changes"], 1);
        assert!(rendered(TextFormat::Text).contains("+    \"Login\""));
        assert!(rendered(TextFormat::Html).contains("<ins>"));
    }

    #[test]
    fn test_missing_change_is_not_found() {
        let db = SharedConnection::in_memory().unwrap();
        let err = db
            .with(|conn| {
                apply_engine_query(
                    EngineQuery::ChangeGet {
                        change_id: "nope".into(),
                    },
                    conn,
                )
            })
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
    }
}
