//! Repository layer for persisting domain models to SQLite

pub mod records;
pub mod sqlite_repo;

pub use records::{AuditEntry, ChangeFilter, SandboxFilter};
pub use sqlite_repo::SqliteRepo;
