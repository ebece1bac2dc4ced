//! Engine facade
//!
//! Wires the store, connectors and configuration into the two services
//! callers use, and exposes read-only queries.

use std::sync::Arc;

use changegate_store::SharedConnection;

use crate::changes::ChangeService;
use crate::commands::engine_query::{apply_engine_query, EngineQuery, EngineQueryResult};
use crate::config::EngineConfig;
use crate::connectors::Connectors;
use crate::errors::Result;
use crate::pipeline::AssessmentPipeline;
use crate::progress::ProgressHub;
use crate::sandboxes::SandboxOrchestrator;

#[derive(Debug, Clone)]
pub struct Engine {
    db: SharedConnection,
    sandboxes: SandboxOrchestrator,
    changes: ChangeService,
}

impl Engine {
    /// Start the engine and its provisioning workers
    ///
    /// Must be called from inside a tokio runtime. Sweeps are not started;
    /// call [`SandboxOrchestrator::spawn_sweeper`] for that.
    pub fn start(db: SharedConnection, connectors: Connectors, config: EngineConfig) -> Self {
        let pipeline = AssessmentPipeline::new(
            Arc::clone(&connectors.catalog),
            Arc::clone(&connectors.policy),
            Arc::clone(&connectors.formula),
            config.timeouts.clone(),
        );
        let changes = ChangeService::new(
            db.clone(),
            Arc::clone(&connectors.catalog),
            Arc::clone(&connectors.audit),
            pipeline.clone(),
            config.timeouts.clone(),
            config.assessment_history,
        );
        let sandboxes =
            SandboxOrchestrator::launch(db.clone(), connectors, pipeline, config, ProgressHub::new());
        Self {
            db,
            sandboxes,
            changes,
        }
    }

    pub fn sandboxes(&self) -> &SandboxOrchestrator {
        &self.sandboxes
    }

    pub fn changes(&self) -> &ChangeService {
        &self.changes
    }

    /// Serve a read-only query from the store
    pub fn query(&self, query: EngineQuery) -> Result<EngineQueryResult> {
        self.db.with(|conn| apply_engine_query(query, conn))
    }
}
