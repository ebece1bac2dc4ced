//! changegate Engine - orchestration layer
//!
//! Coordinates the pure rules in `changegate-core` with persistence in
//! `changegate-store` and the outside world behind the connector traits:
//! - `ChangeService`: change authoring, detection, soft delete and re-scoring
//! - `SandboxOrchestrator`: provisioning, sync, review and expiry sweeps
//! - `AssessmentPipeline`: concurrent impact, policy and formula analysis
//! - `apply_engine_query`: read-only lookups

pub mod audit;
pub mod changes;
pub mod commands;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod sandboxes;

pub use audit::SqliteAuditSink;
pub use changes::{ChangeDraft, ChangeEdit, ChangeQuery, ChangeService};
pub use commands::engine_query::{apply_engine_query, EngineQuery, EngineQueryResult};
pub use config::EngineConfig;
pub use connectors::{
    AuditSink, Catalog, Connectors, EnvironmentStatus, FormulaAnalyzer, Notification,
    NotificationKind, NotificationSink, PlatformConnector, PolicyEvaluator, ResourceUsage,
    VcsConnector,
};
pub use engine::Engine;
pub use errors::Result;
pub use progress::{ProgressEvent, ProgressHub, ProgressStatus, ProgressSubscription, Stage};
pub use sandboxes::{ReviewDecision, SandboxOrchestrator, SweepReport, SyncOutcome};
