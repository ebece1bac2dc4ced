//! changegate Store - SQLite persistence for sandboxes, changes and audit
//!
//! Provides:
//! - SQLite schema with migrations framework
//! - Repository functions over `Connection` / `Transaction`
//! - A mutex-guarded shared connection for async callers

pub mod db;
pub mod errors;
pub mod migrations;
pub mod repo;

// Re-export key types
pub use db::SharedConnection;
pub use errors::Result;
pub use repo::{AuditEntry, ChangeFilter, SandboxFilter, SqliteRepo};
