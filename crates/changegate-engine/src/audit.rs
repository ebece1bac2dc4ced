//! Audit trail backed by the store's `audit_log` table

use async_trait::async_trait;
use changegate_store::{AuditEntry, SharedConnection, SqliteRepo};

use crate::connectors::AuditSink;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    db: SharedConnection,
}

impl SqliteAuditSink {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.db
            .with(|conn| SqliteRepo::append_audit(conn, &entry))
            .map(|_| ())
    }
}
