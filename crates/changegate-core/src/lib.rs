//! changegate core - pure change-risk pipeline and sandbox rules
//!
//! This crate holds everything that does not talk to the outside world:
//! - Structured and text diffing of app snapshots
//! - Impact analysis against the app's component registry
//! - Risk scoring from impact, policy and formula results
//! - The sandbox state machine, quotas, expiry and conflict detection
//! - The error and logging facilities shared by the other crates

pub mod diff;
pub mod errors;
pub mod impact;
pub mod logging_facility;
pub mod model;
pub mod policy;
pub mod risk;
pub mod rules;
pub mod sandbox;

// Re-export commonly used types
pub use diff::{compute_diff, DiffResult, ImpactLevel, OpKind, Operation};
pub use errors::{ErrorClass, ExError, ExErrorKind, GateError, Result};
pub use impact::{analyze_impact, ImpactAnalysis};
pub use model::{
    Actor, ActorRole, AppInfo, Change, ChangeState, ChangeStatus, Component, ConflictStatus,
    Platform, Sandbox, SandboxStatus, SandboxType, Snapshot,
};
pub use policy::{FormulaResult, PolicyAction, PolicyResult, RequiredAction};
pub use risk::{score_risk, RiskAssessment, RiskInputs, RiskLevel};
