//! SQLite repository implementation
//!
//! Persists sandboxes, changes, assessments and the audit trail. Every
//! function takes a `&Connection`; a `&Transaction` derefs to one, so the
//! same calls compose into multi-statement transactions.

use crate::errors::{body_error, from_rusqlite, row_not_found, Result};
use crate::repo::records::{AuditEntry, ChangeFilter, SandboxFilter};
use changegate_core::model::{
    Change, ChangeState, ChangeStatus, Sandbox, SandboxStatus, SandboxType,
};
use changegate_core::risk::RiskAssessment;
use changegate_core::sandbox::QuotaUsage;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// SQLite repository for sandboxes, changes and audit entries
pub struct SqliteRepo;

impl SqliteRepo {
    // ===== Sandboxes =====

    /// Insert a new sandbox row
    ///
    /// Fails with `AlreadyExists` if the id is taken.
    pub fn insert_sandbox(conn: &Connection, sandbox: &Sandbox) -> Result<()> {
        let body = encode(sandbox, "sandboxes", &sandbox.id)?;
        conn.execute(
            "INSERT INTO sandboxes (id, organization_id, app_id, source_app_id, created_by_id,
                sandbox_type, status, conflict_status, expires_at, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                sandbox.id,
                sandbox.organization_id,
                sandbox.app_id,
                sandbox.source_app_id,
                sandbox.created_by_id,
                sandbox.sandbox_type.as_str(),
                sandbox.status().as_str(),
                sandbox.conflict_status().as_str(),
                sandbox.expires_at.timestamp_millis(),
                body,
                sandbox.created_at.timestamp_millis(),
                sandbox.updated_at.timestamp_millis(),
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    /// Overwrite an existing sandbox row
    pub fn update_sandbox(conn: &Connection, sandbox: &Sandbox) -> Result<()> {
        let body = encode(sandbox, "sandboxes", &sandbox.id)?;
        let updated = conn
            .execute(
                "UPDATE sandboxes SET app_id = ?2, source_app_id = ?3, status = ?4,
                    conflict_status = ?5, expires_at = ?6, body = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    sandbox.id,
                    sandbox.app_id,
                    sandbox.source_app_id,
                    sandbox.status().as_str(),
                    sandbox.conflict_status().as_str(),
                    sandbox.expires_at.timestamp_millis(),
                    body,
                    sandbox.updated_at.timestamp_millis(),
                ],
            )
            .map_err(from_rusqlite)?;
        if updated == 0 {
            return Err(row_not_found("sandboxes", &sandbox.id));
        }
        Ok(())
    }

    /// Overwrite a sandbox only if its stored status is still `expected`
    ///
    /// Returns `false` when another writer moved the sandbox first.
    pub fn update_sandbox_if_status(
        conn: &Connection,
        sandbox: &Sandbox,
        expected: SandboxStatus,
    ) -> Result<bool> {
        let body = encode(sandbox, "sandboxes", &sandbox.id)?;
        let updated = conn
            .execute(
                "UPDATE sandboxes SET status = ?2, conflict_status = ?3, expires_at = ?4,
                    body = ?5, updated_at = ?6
                 WHERE id = ?1 AND status = ?7",
                params![
                    sandbox.id,
                    sandbox.status().as_str(),
                    sandbox.conflict_status().as_str(),
                    sandbox.expires_at.timestamp_millis(),
                    body,
                    sandbox.updated_at.timestamp_millis(),
                    expected.as_str(),
                ],
            )
            .map_err(from_rusqlite)?;
        Ok(updated == 1)
    }

    pub fn get_sandbox(conn: &Connection, id: &str) -> Result<Option<Sandbox>> {
        let body: Option<String> = conn
            .query_row("SELECT body FROM sandboxes WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(from_rusqlite)?;
        body.map(|b| decode(&b, "sandboxes", id)).transpose()
    }

    /// Sandboxes matching `filter`, oldest first
    pub fn list_sandboxes(conn: &Connection, filter: &SandboxFilter) -> Result<Vec<Sandbox>> {
        let mut sql = String::from("SELECT id, body FROM sandboxes WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if let Some(org) = &filter.organization_id {
            sql.push_str(" AND organization_id = ?");
            args.push(org.clone());
        }
        if !filter.statuses.is_empty() {
            sql.push_str(" AND status IN (");
            sql.push_str(&placeholders(filter.statuses.len()));
            sql.push(')');
            args.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(t) = filter.sandbox_type {
            sql.push_str(" AND sandbox_type = ?");
            args.push(t.as_str().to_string());
        }
        if let Some(app) = &filter.app_id {
            sql.push_str(" AND (app_id = ? OR source_app_id = ?)");
            args.push(app.clone());
            args.push(app.clone());
        }
        if let Some(owner) = &filter.created_by_id {
            sql.push_str(" AND created_by_id = ?");
            args.push(owner.clone());
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        rows.iter()
            .map(|(id, body)| decode(body, "sandboxes", id))
            .collect()
    }

    /// Remove the row outright; returns whether it existed
    pub fn delete_sandbox(conn: &Connection, id: &str) -> Result<bool> {
        let deleted = conn
            .execute("DELETE FROM sandboxes WHERE id = ?1", [id])
            .map_err(from_rusqlite)?;
        Ok(deleted > 0)
    }

    /// Count the slots a create request would compete for
    ///
    /// Only sandboxes in quota-counting statuses are included.
    pub fn quota_usage(
        conn: &Connection,
        organization_id: &str,
        sandbox_type: SandboxType,
        source_app_id: Option<&str>,
    ) -> Result<QuotaUsage> {
        let counting: Vec<&str> = SandboxStatus::ALL
            .iter()
            .filter(|s| s.counts_toward_quota())
            .map(|s| s.as_str())
            .collect();
        let in_list = placeholders(counting.len());

        let count = |extra: &str, extra_args: &[&str]| -> Result<u32> {
            let sql = format!(
                "SELECT COUNT(*) FROM sandboxes WHERE organization_id = ? AND status IN ({}){}",
                in_list, extra
            );
            let mut args: Vec<&str> = Vec::with_capacity(1 + counting.len() + extra_args.len());
            args.push(organization_id);
            args.extend(counting.iter().copied());
            args.extend_from_slice(extra_args);
            let n: i64 = conn
                .query_row(&sql, params_from_iter(args), |row| row.get(0))
                .map_err(from_rusqlite)?;
            Ok(u32::try_from(n).unwrap_or(u32::MAX))
        };

        let organization = count("", &[])?;
        let of_type = count(" AND sandbox_type = ?", &[sandbox_type.as_str()])?;
        let of_source_app = match (sandbox_type, source_app_id) {
            (SandboxType::Clone, Some(source)) => count(
                " AND sandbox_type = ? AND source_app_id = ?",
                &[SandboxType::Clone.as_str(), source],
            )?,
            _ => 0,
        };

        Ok(QuotaUsage {
            organization,
            of_type,
            of_source_app,
        })
    }

    // ===== Changes =====

    pub fn insert_change(conn: &Connection, change: &Change) -> Result<()> {
        let body = encode(change, "changes", &change.id)?;
        let assessment = change
            .risk_assessment
            .as_ref()
            .map(|a| encode(a, "changes", &change.id))
            .transpose()?;
        conn.execute(
            "INSERT INTO changes (id, app_id, organization_id, sandbox_id, status, state, body,
                risk_assessment, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                change.id,
                change.app_id,
                change.organization_id,
                change.sandbox_id,
                change.status.as_str(),
                change.state.as_str(),
                body,
                assessment,
                change.created_at.timestamp_millis(),
                change.updated_at.timestamp_millis(),
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    /// Overwrite a change's body, status, state and assessment
    pub fn update_change(conn: &Connection, change: &Change) -> Result<()> {
        let body = encode(change, "changes", &change.id)?;
        let assessment = change
            .risk_assessment
            .as_ref()
            .map(|a| encode(a, "changes", &change.id))
            .transpose()?;
        let updated = conn
            .execute(
                "UPDATE changes SET status = ?2, state = ?3, body = ?4, risk_assessment = ?5,
                    updated_at = ?6
                 WHERE id = ?1",
                params![
                    change.id,
                    change.status.as_str(),
                    change.state.as_str(),
                    body,
                    assessment,
                    change.updated_at.timestamp_millis(),
                ],
            )
            .map_err(from_rusqlite)?;
        if updated == 0 {
            return Err(row_not_found("changes", &change.id));
        }
        Ok(())
    }

    /// Load a change; status, state and assessment come from their columns
    pub fn get_change(conn: &Connection, id: &str) -> Result<Option<Change>> {
        conn.query_row(
            "SELECT id, body, status, state, risk_assessment FROM changes WHERE id = ?1",
            [id],
            ChangeRow::read,
        )
        .optional()
        .map_err(from_rusqlite)?
        .map(ChangeRow::into_change)
        .transpose()
    }

    /// Changes matching `filter`, oldest first
    pub fn list_changes(conn: &Connection, filter: &ChangeFilter) -> Result<Vec<Change>> {
        let mut sql = String::from(
            "SELECT id, body, status, state, risk_assessment FROM changes WHERE 1 = 1",
        );
        let mut args: Vec<&str> = Vec::new();

        if let Some(org) = &filter.organization_id {
            sql.push_str(" AND organization_id = ?");
            args.push(org);
        }
        if let Some(app) = &filter.app_id {
            sql.push_str(" AND app_id = ?");
            args.push(app);
        }
        if let Some(sandbox) = &filter.sandbox_id {
            sql.push_str(" AND sandbox_id = ?");
            args.push(sandbox);
        }
        if !filter.include_undone {
            sql.push_str(" AND state = ?");
            args.push(ChangeState::Active.as_str());
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
        let rows = stmt
            .query_map(params_from_iter(args), ChangeRow::read)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    /// Hard delete; history rows cascade
    pub fn delete_change(conn: &Connection, id: &str) -> Result<bool> {
        let deleted = conn
            .execute("DELETE FROM changes WHERE id = ?1", [id])
            .map_err(from_rusqlite)?;
        Ok(deleted > 0)
    }

    pub fn set_change_state(
        conn: &Connection,
        id: &str,
        state: ChangeState,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = conn
            .execute(
                "UPDATE changes SET state = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, state.as_str(), at.timestamp_millis()],
            )
            .map_err(from_rusqlite)?;
        if updated == 0 {
            return Err(row_not_found("changes", id));
        }
        Ok(())
    }

    /// Store the latest assessment in a single UPDATE (last write wins)
    ///
    /// With `keep_history` the assessment is also appended to the log.
    /// Callers wanting both writes atomic pass a transaction.
    pub fn write_assessment(
        conn: &Connection,
        change_id: &str,
        assessment: &RiskAssessment,
        status: ChangeStatus,
        keep_history: bool,
    ) -> Result<()> {
        let encoded = encode(assessment, "changes", change_id)?;
        let updated = conn
            .execute(
                "UPDATE changes SET risk_assessment = ?2, status = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![
                    change_id,
                    encoded,
                    status.as_str(),
                    assessment.assessed_at.timestamp_millis(),
                ],
            )
            .map_err(from_rusqlite)?;
        if updated == 0 {
            return Err(row_not_found("changes", change_id));
        }

        if keep_history {
            conn.execute(
                "INSERT INTO risk_assessment_log (change_id, score, level, auto_block, assessment,
                    assessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    change_id,
                    assessment.score,
                    assessment.level.as_str(),
                    assessment.auto_block,
                    encoded,
                    assessment.assessed_at.timestamp_millis(),
                ],
            )
            .map_err(from_rusqlite)?;
        }
        Ok(())
    }

    /// Logged assessments for a change, oldest first
    pub fn assessment_history(conn: &Connection, change_id: &str) -> Result<Vec<RiskAssessment>> {
        let mut stmt = conn
            .prepare("SELECT assessment FROM risk_assessment_log WHERE change_id = ?1 ORDER BY id")
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([change_id], |row| row.get::<_, String>(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        rows.iter()
            .map(|body| decode(body, "risk_assessment_log", change_id))
            .collect()
    }

    /// Ids of changes in a sandbox that a policy has blocked
    ///
    /// Undone changes count: their content is still on the branch.
    pub fn blocked_change_ids(conn: &Connection, sandbox_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM changes WHERE sandbox_id = ?1 AND status = ?2
                 ORDER BY created_at, id",
            )
            .map_err(from_rusqlite)?;
        let ids = stmt
            .query_map(
                params![sandbox_id, ChangeStatus::Blocked.as_str()],
                |row| row.get(0),
            )
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    pub fn record_sync(
        conn: &Connection,
        sandbox: &Sandbox,
        expected: SandboxStatus,
        change: Option<&Change>,
    ) -> Result<bool> {
        if !Self::update_sandbox_if_status(conn, sandbox, expected)? {
            return Ok(false);
        }
        if let Some(change) = change {
            Self::insert_change(conn, change)?;
        }
        Ok(true)
    }

    // ===== Audit =====

    /// Append an entry, returning its row id
    pub fn append_audit(conn: &Connection, entry: &AuditEntry) -> Result<i64> {
        let details = entry
            .details
            .as_ref()
            .map(|d| encode(d, "audit_log", &entry.entity_id))
            .transpose()?;
        conn.execute(
            "INSERT INTO audit_log (actor_id, action, entity_type, entity_id, before_state,
                after_state, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.actor_id,
                entry.action,
                entry.entity_type,
                entry.entity_id,
                entry.before_state,
                entry.after_state,
                details,
                entry.created_at.timestamp_millis(),
            ],
        )
        .map_err(from_rusqlite)?;
        Ok(conn.last_insert_rowid())
    }

    /// Audit trail of one entity in insertion order
    pub fn list_audit(
        conn: &Connection,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, actor_id, action, entity_type, entity_id, before_state, after_state,
                    details, created_at
                 FROM audit_log WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id",
            )
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([entity_type, entity_id], |row| {
                Ok((
                    AuditEntry {
                        id: Some(row.get(0)?),
                        actor_id: row.get(1)?,
                        action: row.get(2)?,
                        entity_type: row.get(3)?,
                        entity_id: row.get(4)?,
                        before_state: row.get(5)?,
                        after_state: row.get(6)?,
                        details: None,
                        created_at: millis_to_datetime(row.get(8)?),
                    },
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        rows.into_iter()
            .map(|(mut entry, details)| {
                entry.details = details
                    .map(|d| decode(&d, "audit_log", entity_id))
                    .transpose()?;
                Ok(entry)
            })
            .collect()
    }
}

/// Raw change row before the JSON body is decoded
struct ChangeRow {
    id: String,
    body: String,
    status: String,
    state: String,
    risk_assessment: Option<String>,
}

impl ChangeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            body: row.get(1)?,
            status: row.get(2)?,
            state: row.get(3)?,
            risk_assessment: row.get(4)?,
        })
    }

    fn into_change(self) -> Result<Change> {
        let mut change: Change = decode(&self.body, "changes", &self.id)?;
        change.status = ChangeStatus::parse(&self.status)?;
        change.state = ChangeState::parse(&self.state)?;
        change.risk_assessment = self
            .risk_assessment
            .map(|a| decode(&a, "changes", &self.id))
            .transpose()?;
        Ok(change)
    }
}

fn encode<T: serde::Serialize>(value: &T, table: &str, id: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| body_error(table, id, e))
}

fn decode<T: serde::de::DeserializeOwned>(body: &str, table: &str, id: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| body_error(table, id, e))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
