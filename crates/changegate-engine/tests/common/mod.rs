//! In-memory connector fakes shared by the engine integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use changegate_core::errors::{ExError, ExErrorKind};
use changegate_core::model::{Actor, AppInfo, Change, Component, Platform, SandboxRequest, SandboxType, Snapshot};
use changegate_core::policy::{PolicyAction, PolicyResult, RequiredAction};
use changegate_core::sandbox::FileDiff;
use changegate_core_types::Sensitive;
use changegate_engine::config::EngineConfig;
use changegate_engine::{
    Catalog, Connectors, Engine, EnvironmentStatus, Notification, NotificationKind,
    NotificationSink, PlatformConnector, PolicyEvaluator, ResourceUsage, SqliteAuditSink,
    VcsConnector,
};
use changegate_store::SharedConnection;
use serde_json::{json, Value};

pub const ORG: &str = "org-1";
pub const OWNER: &str = "owner-1";
pub const REVIEWER: &str = "reviewer-1";
pub const MENDIX_APP: &str = "app-mx";
pub const POWER_APP: &str = "app-pp";

pub fn owner() -> Actor {
    Actor::member(OWNER, ORG)
}

pub fn reviewer() -> Actor {
    Actor::reviewer(REVIEWER, ORG)
}

pub fn outsider() -> Actor {
    Actor::member("stranger", "org-2")
}

pub fn feature_request(app_id: &str) -> SandboxRequest {
    SandboxRequest {
        app_id: Some(app_id.to_string()),
        source_app_id: None,
        name: "checkout redesign".to_string(),
        description: None,
        sandbox_type: SandboxType::Feature,
        duration_days: None,
    }
}

fn other_error(op: &str) -> ExError {
    ExError::new(ExErrorKind::ExternalService)
        .with_op(op)
        .with_message("injected failure")
}

// ===== Catalog =====

pub struct FakeCatalog {
    apps: HashMap<String, AppInfo>,
    components: Vec<Component>,
    reviewers: Vec<String>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        let mut apps = HashMap::new();
        for (id, platform) in [(MENDIX_APP, Platform::Mendix), (POWER_APP, Platform::PowerPlatform)] {
            apps.insert(
                id.to_string(),
                AppInfo {
                    id: id.to_string(),
                    organization_id: ORG.to_string(),
                    name: format!("{} app", id),
                    platform,
                    repository: format!("repo-{}", id),
                    trunk_branch: "main".to_string(),
                    access_token: Some(Sensitive::new(format!("token-{}", id))),
                },
            );
        }
        Self {
            apps,
            components: vec![Component::new(
                "cmp-checkout",
                "Checkout",
                "screen",
                "/screens/Checkout",
            )
            .with_metadata(json!({"items": "Orders"}))],
            reviewers: vec![REVIEWER.to_string(), "reviewer-2".to_string()],
        }
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn get_app(&self, app_id: &str) -> changegate_engine::Result<Option<AppInfo>> {
        Ok(self.apps.get(app_id).cloned())
    }

    async fn list_components(&self, _app_id: &str) -> changegate_engine::Result<Vec<Component>> {
        Ok(self.components.clone())
    }

    async fn list_reviewers(&self, _organization_id: &str) -> changegate_engine::Result<Vec<String>> {
        Ok(self.reviewers.clone())
    }
}

// ===== Platform =====

#[derive(Default)]
pub struct PlatformState {
    /// Document and revision counter per branch
    pub branches: HashMap<String, (Value, u32)>,
    pub environments: HashSet<String>,
    pub deprovisioned: Vec<String>,
    pub deleted_branches: Vec<String>,
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub exports: u32,
    pub fail_provision: bool,
    pub fail_environment: Option<String>,
    pub fail_create_branch: bool,
    pub fail_export: bool,
    /// Tokens the platform no longer accepts
    pub revoked_tokens: HashSet<String>,
    /// Held while exporting, to overlap concurrent calls
    pub export_delay_ms: u64,
}

pub struct FakePlatform {
    pub state: Mutex<PlatformState>,
    trunk: Value,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
            trunk: json!({
                "screens": {"Checkout": {"items": "Orders", "title": "Checkout"}},
                "dataSources": {"Orders": {"table": "orders"}}
            }),
        }
    }

    /// Simulate a maker editing the app in the sandbox branch
    pub fn edit(&self, branch: &str, document: Value) {
        let mut state = self.state.lock().unwrap();
        let entry = state.branches.get_mut(branch).expect("branch exists");
        entry.0 = document;
        entry.1 += 1;
    }

    pub fn document(&self, branch: &str) -> Value {
        self.state.lock().unwrap().branches[branch].0.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut PlatformState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

fn revision(n: u32) -> String {
    format!("rev-{}", n)
}

#[async_trait]
impl PlatformConnector for FakePlatform {
    async fn validate_credentials(&self, app: &AppInfo) -> changegate_engine::Result<()> {
        let state = self.state.lock().unwrap();
        match &app.access_token {
            Some(token) if !state.revoked_tokens.contains(token.expose()) => Ok(()),
            _ => Err(ExError::new(ExErrorKind::ExternalService)
                .with_op("validate_credentials")
                .with_entity_id(&app.id)
                .with_message("credentials rejected")),
        }
    }

    async fn export_snapshot(&self, _app: &AppInfo, branch: &str) -> changegate_engine::Result<Snapshot> {
        let (exported, delay) = {
            let mut state = self.state.lock().unwrap();
            if state.fail_export {
                return Err(other_error("export_snapshot"));
            }
            state.exports += 1;
            (state.branches.get(branch).cloned(), state.export_delay_ms)
        };
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let (document, n) = exported.ok_or_else(|| other_error("export_snapshot"))?;
        Ok(Snapshot::new(document).with_revision(revision(n)))
    }

    async fn create_branch(&self, _app: &AppInfo, branch: &str) -> changegate_engine::Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_branch {
            return Err(other_error("create_branch"));
        }
        state
            .branches
            .insert(branch.to_string(), (self.trunk.clone(), 1));
        Ok(revision(1))
    }

    async fn delete_branch(&self, _app: &AppInfo, branch: &str) -> changegate_engine::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.branches.remove(branch);
        state.deleted_branches.push(branch.to_string());
        Ok(())
    }

    async fn branch_exists(&self, _app: &AppInfo, branch: &str) -> changegate_engine::Result<bool> {
        Ok(self.state.lock().unwrap().branches.contains_key(branch))
    }

    async fn provision(&self, _app: &AppInfo, sandbox_id: &str) -> changegate_engine::Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_provision {
            return Err(other_error("provision"));
        }
        let env = format!("env-{}", sandbox_id);
        state.environments.insert(env.clone());
        Ok(env)
    }

    async fn deprovision(&self, environment_id: &str) -> changegate_engine::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.environments.remove(environment_id);
        state.deprovisioned.push(environment_id.to_string());
        Ok(())
    }

    async fn start(&self, environment_id: &str) -> changegate_engine::Result<()> {
        self.state
            .lock()
            .unwrap()
            .started
            .push(environment_id.to_string());
        Ok(())
    }

    async fn stop(&self, environment_id: &str) -> changegate_engine::Result<()> {
        self.state
            .lock()
            .unwrap()
            .stopped
            .push(environment_id.to_string());
        Ok(())
    }

    async fn get_status(&self, _environment_id: &str) -> changegate_engine::Result<EnvironmentStatus> {
        let state = self.state.lock().unwrap();
        Ok(match &state.fail_environment {
            Some(reason) => EnvironmentStatus::Failed(reason.clone()),
            None => EnvironmentStatus::Ready,
        })
    }

    async fn get_resource_usage(&self, _environment_id: &str) -> changegate_engine::Result<ResourceUsage> {
        Ok(ResourceUsage {
            cpu_percent: 12.5,
            memory_mb: 512,
            storage_mb: 2048,
        })
    }
}

// ===== VCS =====

#[derive(Default)]
pub struct VcsState {
    pub heads: HashMap<(String, String), String>,
    pub commits: u32,
    /// Files changed between (base, head)
    pub diffs: HashMap<(String, String), Vec<FileDiff>>,
    pub deleted_branches: Vec<String>,
    pub fail_create_branch: bool,
}

pub struct FakeVcs {
    pub state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new() -> Self {
        let mut state = VcsState::default();
        for app in [MENDIX_APP, POWER_APP] {
            state
                .heads
                .insert((format!("repo-{}", app), "main".to_string()), "trunk-0".to_string());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Move trunk forward, recording which files the move touched
    pub fn advance_trunk(&self, app_id: &str, base: &str, head: &str, files: Vec<FileDiff>) {
        let mut state = self.state.lock().unwrap();
        state
            .heads
            .insert((format!("repo-{}", app_id), "main".to_string()), head.to_string());
        state
            .diffs
            .insert((base.to_string(), head.to_string()), files);
    }

    /// Files the sandbox's commit `head` touched relative to `base`
    pub fn set_diff(&self, base: &str, head: &str, files: Vec<FileDiff>) {
        self.state
            .lock()
            .unwrap()
            .diffs
            .insert((base.to_string(), head.to_string()), files);
    }

    pub fn commit_count(&self) -> u32 {
        self.state.lock().unwrap().commits
    }
}

#[async_trait]
impl VcsConnector for FakeVcs {
    async fn commit_snapshot(
        &self,
        repository: &str,
        branch: &str,
        _snapshot: &Snapshot,
        _message: &str,
    ) -> changegate_engine::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.commits += 1;
        let commit = format!("commit-{}", state.commits);
        state
            .heads
            .insert((repository.to_string(), branch.to_string()), commit.clone());
        Ok(commit)
    }

    async fn compare_commits(
        &self,
        _repository: &str,
        base: &str,
        head: &str,
    ) -> changegate_engine::Result<Vec<FileDiff>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .diffs
            .get(&(base.to_string(), head.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        from_commit: &str,
    ) -> changegate_engine::Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_branch {
            return Err(other_error("create_branch"));
        }
        state.heads.insert(
            (repository.to_string(), branch.to_string()),
            from_commit.to_string(),
        );
        Ok(from_commit.to_string())
    }

    async fn delete_branch(&self, repository: &str, branch: &str) -> changegate_engine::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .heads
            .remove(&(repository.to_string(), branch.to_string()));
        state.deleted_branches.push(branch.to_string());
        Ok(())
    }

    async fn branch_head(&self, repository: &str, branch: &str) -> changegate_engine::Result<String> {
        let state = self.state.lock().unwrap();
        state
            .heads
            .get(&(repository.to_string(), branch.to_string()))
            .cloned()
            .ok_or_else(|| {
                ExError::new(ExErrorKind::NotFound)
                    .with_op("branch_head")
                    .with_message(format!("no branch {}", branch))
            })
    }
}

// ===== Notifications and policies =====

#[derive(Default)]
pub struct RecordingNotifications {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifications {
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn notify(&self, notification: Notification) -> changegate_engine::Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Blocks any change that touches data sources
pub struct DataSourceGuard;

#[async_trait]
impl PolicyEvaluator for DataSourceGuard {
    async fn evaluate(&self, change: &Change, _organization_id: &str) -> changegate_engine::Result<PolicyResult> {
        let touches = change
            .diff_result
            .operations
            .iter()
            .any(|op| op.path.starts_with("/dataSources"));
        Ok(if touches {
            PolicyResult::violated(vec![RequiredAction::new(
                "no-datasource-edits",
                PolicyAction::Block,
            )])
        } else {
            PolicyResult::passed()
        })
    }
}

/// Always errors
pub struct BrokenPolicy;

#[async_trait]
impl PolicyEvaluator for BrokenPolicy {
    async fn evaluate(&self, _change: &Change, _organization_id: &str) -> changegate_engine::Result<PolicyResult> {
        Err(other_error("policy_evaluate"))
    }
}

// ===== Harness =====

pub struct Harness {
    pub engine: Engine,
    pub db: SharedConnection,
    pub platform: Arc<FakePlatform>,
    pub vcs: Arc<FakeVcs>,
    pub notifications: Arc<RecordingNotifications>,
}

pub struct HarnessBuilder {
    config: EngineConfig,
    policy: Option<Arc<dyn PolicyEvaluator>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.provisioning.poll_interval_ms = 1;
        config.provisioning.poll_attempts = 3;
        Self {
            config,
            policy: None,
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> Harness {
        let db = SharedConnection::in_memory().unwrap();
        let platform = Arc::new(FakePlatform::new());
        let vcs = Arc::new(FakeVcs::new());
        let notifications = Arc::new(RecordingNotifications::default());

        let mut connectors = Connectors::new(
            Arc::new(FakeCatalog::new()),
            vcs.clone(),
            Arc::new(SqliteAuditSink::new(db.clone())),
        )
        .with_platform(Platform::Mendix, platform.clone())
        .with_platform(Platform::PowerPlatform, platform.clone())
        .with_notifications(notifications.clone());
        if let Some(policy) = self.policy {
            connectors = connectors.with_policy(policy);
        }

        let engine = Engine::start(db.clone(), connectors, self.config);
        Harness {
            engine,
            db,
            platform,
            vcs,
            notifications,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Create a sandbox and wait for provisioning to finish
    pub async fn active_sandbox(&self, app_id: &str) -> changegate_core::model::Sandbox {
        let (sandbox, ticket) = self
            .engine
            .sandboxes()
            .create(&owner(), feature_request(app_id))
            .await
            .unwrap();
        ticket.wait().await.unwrap();
        self.engine.sandboxes().get(&owner(), &sandbox.id).unwrap()
    }
}
