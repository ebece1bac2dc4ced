//! Domain model
//!
//! Snapshots, changes, sandboxes and the catalog types they refer to.

pub mod actor;
pub mod app;
pub mod change;
pub mod sandbox;
pub mod snapshot;

pub use actor::{Actor, ActorRole};
pub use app::{AppInfo, Component, FormulaDialect, Platform};
pub use change::{Change, ChangeState, ChangeStatus, NewChange};
pub use sandbox::{
    ConflictResolution, ConflictStatus, ResolutionStrategy, Sandbox, SandboxRequest,
    SandboxStatus, SandboxType, SandboxUpdate,
};
pub use snapshot::Snapshot;
