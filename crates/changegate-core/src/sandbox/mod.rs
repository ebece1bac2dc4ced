//! Sandbox rules
//!
//! Pure lifecycle logic: the state machine, quota checks, expiry and
//! warnings, conflict detection between branches, and statistics. The
//! engine crate performs the external calls and persistence around them.

pub mod conflict;
pub mod expiry;
pub mod lifecycle;
pub mod quota;
pub mod stats;

pub use conflict::{ConflictDetector, FileChangeKind, FileDiff, PathOverlapDetector};
pub use expiry::{is_due_for_expiry, ExpiryPolicy};
pub use lifecycle::{validate_transition, ProvisionedWorkspace};
pub use quota::{check_quota, QuotaLimits, QuotaUsage};
pub use stats::{compute_stats, SandboxStats};
