//! Sandbox lifecycle flows against in-memory connectors
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use changegate_core::errors::ExErrorKind;
use changegate_core::model::{ConflictStatus, ResolutionStrategy, SandboxStatus, SandboxUpdate};
use changegate_core::sandbox::{FileChangeKind, FileDiff};
use changegate_engine::{
    EngineQuery, EngineQueryResult, NotificationKind, ProgressStatus, ReviewDecision, Stage,
};
use changegate_store::SandboxFilter;
use common::*;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn audit_actions(harness: &Harness, sandbox_id: &str) -> Vec<String> {
    match harness
        .engine
        .query(EngineQuery::AuditTrail {
            entity_type: "sandbox".to_string(),
            entity_id: sandbox_id.to_string(),
        })
        .unwrap()
    {
        EngineQueryResult::Audit(entries) => entries.into_iter().map(|e| e.action).collect(),
        other => panic!("unexpected result {:?}", other),
    }
}

fn edited_checkout() -> serde_json::Value {
    json!({
        "screens": {"Checkout": {"items": "Orders", "title": "Pay now"}},
        "dataSources": {"Orders": {"table": "orders"}}
    })
}

#[tokio::test]
async fn test_create_provisions_and_activates() {
    let h = Harness::new();
    let (created, ticket) = h
        .engine
        .sandboxes()
        .create(&owner(), feature_request(MENDIX_APP))
        .await
        .unwrap();
    assert_eq!(created.status(), SandboxStatus::Provisioning);

    ticket.wait().await.unwrap();
    let sandbox = h.engine.sandboxes().get(&owner(), &created.id).unwrap();

    assert_eq!(sandbox.status(), SandboxStatus::Active);
    assert_eq!(sandbox.environment_id, Some(format!("env-{}", created.id)));
    assert_eq!(sandbox.base_revision.as_deref(), Some("rev-1"));
    assert_eq!(sandbox.base_commit.as_deref(), Some("trunk-0"));
    assert_eq!(sandbox.latest_commit, sandbox.base_commit);
    assert!(sandbox.last_snapshot.is_some());

    let ready = h.notifications.of_kind(NotificationKind::SandboxReady);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].recipient_id, OWNER);
    assert_eq!(
        audit_actions(&h, &created.id),
        vec!["sandbox.create", "sandbox.provisioned"]
    );
}

#[tokio::test]
async fn test_sync_without_new_revision_is_noop() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;

    let outcome = h.engine.sandboxes().sync(&owner(), &sandbox.id).await.unwrap();

    assert!(outcome.noop);
    assert!(outcome.change.is_none());
    assert_eq!(h.vcs.commit_count(), 0);
    let stored = h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored, sandbox);
}

#[tokio::test]
async fn test_sync_records_change_and_reports_stages() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    let branch = sandbox.platform_branch.clone().unwrap();
    h.platform.edit(&branch, edited_checkout());

    let mut progress = h.engine.sandboxes().subscribe(&owner(), &sandbox.id).unwrap();
    let outcome = h.engine.sandboxes().sync(&owner(), &sandbox.id).await.unwrap();

    assert!(!outcome.noop);
    let change = outcome.change.expect("change detected");
    assert_eq!(change.sandbox_id.as_deref(), Some(sandbox.id.as_str()));
    assert_eq!(change.diff_result.total_changes, 1);
    assert!(change.risk_assessment.is_some());
    assert_eq!(outcome.sandbox.latest_revision.as_deref(), Some("rev-2"));
    assert_eq!(outcome.sandbox.latest_commit.as_deref(), Some("commit-1"));
    assert_eq!(outcome.sandbox.base_revision.as_deref(), Some("rev-1"));

    let mut stages = Vec::new();
    while let Some(event) = progress.try_next() {
        stages.push((event.stage, event.status));
    }
    assert_eq!(
        stages,
        vec![
            (Stage::Validating, ProgressStatus::Running),
            (Stage::VerifyingBranch, ProgressStatus::Running),
            (Stage::Exporting, ProgressStatus::Running),
            (Stage::Uploading, ProgressStatus::Running),
            (Stage::Committing, ProgressStatus::Running),
            (Stage::DetectingChanges, ProgressStatus::Running),
            (Stage::Complete, ProgressStatus::Completed),
        ]
    );

    // Re-syncing the same revision writes nothing
    let again = h.engine.sandboxes().sync(&owner(), &sandbox.id).await.unwrap();
    assert!(again.noop);
    assert_eq!(h.vcs.commit_count(), 1);
}

#[tokio::test]
async fn test_sync_failure_leaves_pointers_untouched() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.edit(sandbox.platform_branch.as_deref().unwrap(), edited_checkout());
    h.platform.with(|s| s.fail_export = true);

    let mut progress = h.engine.sandboxes().subscribe(&owner(), &sandbox.id).unwrap();
    let err = h
        .engine
        .sandboxes()
        .sync(&owner(), &sandbox.id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::ExternalService);
    assert_eq!(err.stage(), Some("exporting"));
    let stored = h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored.latest_revision.as_deref(), Some("rev-1"));

    let mut last = None;
    while let Some(event) = progress.try_next() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.stage, Stage::Exporting);
    assert_eq!(last.status, ProgressStatus::Failed);
}

#[tokio::test]
async fn test_rejected_credentials_fail_sync_before_export() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.edit(sandbox.platform_branch.as_deref().unwrap(), edited_checkout());
    let exports_before = h.platform.with(|s| s.exports);
    h.platform.with(|s| {
        s.revoked_tokens.insert(format!("token-{}", MENDIX_APP));
    });

    let mut progress = h.engine.sandboxes().subscribe(&owner(), &sandbox.id).unwrap();
    let err = assert_err!(h.engine.sandboxes().sync(&owner(), &sandbox.id).await);

    assert_eq!(err.kind(), ExErrorKind::ExternalService);
    assert_eq!(err.stage(), Some("validating"));
    assert!(!err.to_string().contains("token-"));
    assert_eq!(h.platform.with(|s| s.exports), exports_before);
    let stored = h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored.latest_revision, sandbox.latest_revision);
    assert_eq!(stored.latest_commit, sandbox.latest_commit);
    assert_eq!(stored.last_synced_at, sandbox.last_synced_at);

    let mut events = Vec::new();
    while let Some(event) = progress.try_next() {
        events.push(event);
    }
    let last = events.last().unwrap();
    assert_eq!(last.stage, Stage::Validating);
    assert_eq!(last.status, ProgressStatus::Failed);
    assert!(events.iter().all(|e| e.stage == Stage::Validating));
}

#[tokio::test]
async fn test_overlapping_sync_is_rejected() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.with(|s| s.export_delay_ms = 50);

    let sandboxes = h.engine.sandboxes();
    let actor = owner();
    let (first, second) = tokio::join!(
        sandboxes.sync(&actor, &sandbox.id),
        sandboxes.sync(&actor, &sandbox.id)
    );

    assert_ok!(first);
    let err = assert_err!(second);
    assert_eq!(err.kind(), ExErrorKind::Concurrency);

    // The guard is released once the first sync finishes
    assert_ok!(sandboxes.sync(&actor, &sandbox.id).await);
}

#[tokio::test]
async fn test_conflict_blocks_submit_until_resolved() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.edit(sandbox.platform_branch.as_deref().unwrap(), edited_checkout());
    h.engine.sandboxes().sync(&owner(), &sandbox.id).await.unwrap();

    // Trunk and the sandbox both touched the checkout screen
    let touched = vec![FileDiff::new("screens/Checkout.json", FileChangeKind::Modified)];
    h.vcs.set_diff("trunk-0", "commit-1", touched.clone());
    h.vcs.advance_trunk(MENDIX_APP, "trunk-0", "trunk-1", touched);

    let err = h
        .engine
        .sandboxes()
        .submit(&owner(), &sandbox.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::Conflict);
    assert_eq!(err.paths(), Some(&["screens/Checkout.json".to_string()][..]));

    let stored = h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored.status(), SandboxStatus::Active);
    assert_eq!(stored.conflict_status(), ConflictStatus::NeedsResolution);
    assert_eq!(h.vcs.commit_count(), 1, "submit must not commit while conflicted");
    assert_eq!(h.notifications.of_kind(NotificationKind::ConflictDetected).len(), 1);

    // Still refused on retry
    let retry = h.engine.sandboxes().submit(&owner(), &sandbox.id).await;
    assert_eq!(assert_err!(retry).kind(), ExErrorKind::Conflict);

    // Only reviewers resolve
    let denied = h
        .engine
        .sandboxes()
        .resolve_conflict(&owner(), &sandbox.id, ResolutionStrategy::KeepSandbox, None)
        .await;
    assert_eq!(assert_err!(denied).kind(), ExErrorKind::Forbidden);

    let resolved = h
        .engine
        .sandboxes()
        .resolve_conflict(
            &reviewer(),
            &sandbox.id,
            ResolutionStrategy::KeepSandbox,
            Some("sandbox copy wins".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(resolved.conflict_status(), ConflictStatus::Resolved);
    assert_eq!(resolved.base_commit.as_deref(), Some("trunk-1"));
    assert!(resolved.conflicts.is_empty());
    assert_eq!(
        resolved.conflict_resolution.as_ref().unwrap().paths,
        vec!["screens/Checkout.json".to_string()]
    );

    let submitted = h.engine.sandboxes().submit(&owner(), &sandbox.id).await.unwrap();
    assert_eq!(submitted.status(), SandboxStatus::PendingReview);
    assert_eq!(h.notifications.of_kind(NotificationKind::ReviewRequested).len(), 2);
}

#[tokio::test]
async fn test_trunk_moving_elsewhere_is_only_potential_conflict() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.vcs.advance_trunk(
        MENDIX_APP,
        "trunk-0",
        "trunk-1",
        vec![FileDiff::new("flows/OnStart.json", FileChangeKind::Added)],
    );

    let submitted = h.engine.sandboxes().submit(&owner(), &sandbox.id).await.unwrap();
    assert_eq!(submitted.status(), SandboxStatus::PendingReview);
    assert_eq!(submitted.conflict_status(), ConflictStatus::Potential);
}

#[tokio::test]
async fn test_auto_blocked_change_refuses_submit() {
    let h = HarnessBuilder::new()
        .policy(std::sync::Arc::new(DataSourceGuard))
        .build();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.edit(
        sandbox.platform_branch.as_deref().unwrap(),
        json!({
            "screens": {"Checkout": {"items": "Orders", "title": "Checkout"}},
            "dataSources": {}
        }),
    );

    let err = h
        .engine
        .sandboxes()
        .submit(&owner(), &sandbox.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::PolicyBlocked);
    assert!(err.message().contains("no-datasource-edits"));
    let stored = h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored.status(), SandboxStatus::Active);

    let changes = h
        .engine
        .changes()
        .list(&owner(), &changegate_engine::ChangeQuery {
            sandbox_id: Some(sandbox.id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].is_auto_blocked());
}

#[tokio::test]
async fn test_blocked_change_cannot_be_dropped_to_reopen_submit() {
    let h = HarnessBuilder::new()
        .policy(std::sync::Arc::new(DataSourceGuard))
        .build();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.edit(
        sandbox.platform_branch.as_deref().unwrap(),
        json!({
            "screens": {"Checkout": {"items": "Orders", "title": "Checkout"}},
            "dataSources": {}
        }),
    );
    let refused = h.engine.sandboxes().submit(&owner(), &sandbox.id).await;
    assert_eq!(assert_err!(refused).kind(), ExErrorKind::PolicyBlocked);

    let query = changegate_engine::ChangeQuery {
        sandbox_id: Some(sandbox.id.clone()),
        ..Default::default()
    };
    let blocked = h.engine.changes().list(&owner(), &query).unwrap().remove(0);

    let undo = h.engine.changes().undo(&owner(), &blocked.id).await;
    assert_eq!(assert_err!(undo).kind(), ExErrorKind::PolicyBlocked);
    let delete = h.engine.changes().delete(&owner(), &blocked.id).await;
    assert_eq!(assert_err!(delete).kind(), ExErrorKind::PolicyBlocked);
    let delete = h.engine.changes().delete(&reviewer(), &blocked.id).await;
    assert_eq!(assert_err!(delete).kind(), ExErrorKind::PolicyBlocked);

    let still = h.engine.changes().get(&owner(), &blocked.id).unwrap();
    assert!(still.is_auto_blocked());

    let refused = h.engine.sandboxes().submit(&owner(), &sandbox.id).await;
    assert_eq!(assert_err!(refused).kind(), ExErrorKind::PolicyBlocked);
    let stored = h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored.status(), SandboxStatus::Active);
    let approve = h
        .engine
        .sandboxes()
        .review(&reviewer(), &sandbox.id, ReviewDecision::Approve, None)
        .await;
    assert_err!(approve);
    assert_ne!(
        h.engine.sandboxes().get(&owner(), &sandbox.id).unwrap().status(),
        SandboxStatus::Merged
    );

    // Once the sandbox is closed the change no longer gates anything
    h.engine.sandboxes().abandon(&owner(), &sandbox.id).await.unwrap();
    assert_ok!(h.engine.changes().undo(&owner(), &blocked.id).await);
}

#[tokio::test]
async fn test_review_decisions() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    h.platform.edit(sandbox.platform_branch.as_deref().unwrap(), edited_checkout());
    h.engine.sandboxes().submit(&owner(), &sandbox.id).await.unwrap();

    let denied = h
        .engine
        .sandboxes()
        .review(&owner(), &sandbox.id, ReviewDecision::Approve, None)
        .await;
    assert_eq!(assert_err!(denied).kind(), ExErrorKind::Forbidden);

    let sent_back = h
        .engine
        .sandboxes()
        .review(
            &reviewer(),
            &sandbox.id,
            ReviewDecision::RequestChanges,
            Some("rename the button".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(sent_back.status(), SandboxStatus::ChangesRequested);
    let requested = h.notifications.of_kind(NotificationKind::ChangesRequested);
    assert!(requested[0].message.contains("rename the button"));

    // Edits are accepted again, then resubmitted and merged
    assert_ok!(h.engine.sandboxes().sync(&owner(), &sandbox.id).await);
    h.engine.sandboxes().submit(&owner(), &sandbox.id).await.unwrap();
    let merged = h
        .engine
        .sandboxes()
        .review(&reviewer(), &sandbox.id, ReviewDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(merged.status(), SandboxStatus::Merged);

    let env = merged.environment_id.clone().unwrap();
    assert!(h.platform.with(|s| s.deprovisioned.contains(&env)));
    let changes = h
        .engine
        .changes()
        .list(&reviewer(), &changegate_engine::ChangeQuery {
            sandbox_id: Some(sandbox.id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert!(changes
        .iter()
        .all(|c| c.status == changegate_core::model::ChangeStatus::Approved));

    let late = h.engine.sandboxes().sync(&owner(), &sandbox.id).await;
    assert_eq!(assert_err!(late).kind(), ExErrorKind::InvalidTransition);
}

#[tokio::test]
async fn test_quota_checked_before_provisioning() {
    let h = HarnessBuilder::new()
        .config(|c| c.quotas.feature = 1)
        .build();
    h.active_sandbox(MENDIX_APP).await;

    let err = h
        .engine
        .sandboxes()
        .create(&owner(), feature_request(MENDIX_APP))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::QuotaExceeded);
    assert_eq!(h.platform.with(|s| s.environments.len()), 1);
    let listed = h
        .engine
        .sandboxes()
        .list(&owner(), SandboxFilter::default())
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_start_stop_only_where_supported() {
    let h = Harness::new();
    let mendix = h.active_sandbox(MENDIX_APP).await;

    let stopped = h.engine.sandboxes().stop(&owner(), &mendix.id).await.unwrap();
    assert_eq!(stopped.status(), SandboxStatus::Suspended);
    let env = mendix.environment_id.clone().unwrap();
    assert_eq!(h.platform.with(|s| s.stopped.clone()), vec![env.clone()]);

    let sync = h.engine.sandboxes().sync(&owner(), &mendix.id).await;
    assert_eq!(assert_err!(sync).kind(), ExErrorKind::InvalidTransition);

    let started = h.engine.sandboxes().start(&owner(), &mendix.id).await.unwrap();
    assert_eq!(started.status(), SandboxStatus::Active);
    assert_eq!(h.platform.with(|s| s.started.clone()), vec![env]);

    let power = h.active_sandbox(POWER_APP).await;
    let err = h
        .engine
        .sandboxes()
        .stop(&owner(), &power.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::NotSupported);
    let stored = h.engine.sandboxes().get(&owner(), &power.id).unwrap();
    assert_eq!(stored.status(), SandboxStatus::Active);
}

#[tokio::test]
async fn test_environment_failure_marks_failed() {
    let h = Harness::new();
    h.platform
        .with(|s| s.fail_environment = Some("capacity exhausted".to_string()));

    let (created, ticket) = h
        .engine
        .sandboxes()
        .create(&owner(), feature_request(MENDIX_APP))
        .await
        .unwrap();
    ticket.wait().await.unwrap();

    let sandbox = h.engine.sandboxes().get(&owner(), &created.id).unwrap();
    assert_eq!(sandbox.status(), SandboxStatus::Failed);
    assert!(sandbox
        .error_message
        .as_deref()
        .unwrap()
        .contains("capacity exhausted"));
    assert_eq!(
        h.platform.with(|s| s.deprovisioned.clone()),
        vec![format!("env-{}", created.id)]
    );
    assert_eq!(h.notifications.of_kind(NotificationKind::ProvisioningFailed).len(), 1);

    // A failed sandbox can still be deleted
    let deleted = h.engine.sandboxes().delete(&owner(), &created.id).await.unwrap();
    assert_eq!(deleted.status(), SandboxStatus::Deleted);
}

#[tokio::test]
async fn test_branch_failure_rolls_back() {
    let h = Harness::new();
    h.vcs.state.lock().unwrap().fail_create_branch = true;

    let (created, ticket) = h
        .engine
        .sandboxes()
        .create(&owner(), feature_request(MENDIX_APP))
        .await
        .unwrap();
    ticket.wait().await.unwrap();

    let err = h.engine.sandboxes().get(&owner(), &created.id).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::NotFound);

    let branch = format!("sandbox/{}", created.id);
    h.platform.with(|s| {
        assert!(s.deleted_branches.contains(&branch));
        assert!(s.deprovisioned.contains(&format!("env-{}", created.id)));
        assert!(s.environments.is_empty());
    });
    let failed = h.notifications.of_kind(NotificationKind::ProvisioningFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_id, OWNER);
    assert_eq!(
        audit_actions(&h, &created.id),
        vec!["sandbox.create", "sandbox.rollback"]
    );
}

#[tokio::test]
async fn test_warning_and_expiry_sweeps() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    let sandboxes = h.engine.sandboxes();
    let expires = sandbox.expires_at;

    // Six days left crosses the 7-day threshold, once
    let first = sandboxes
        .warning_sweep(expires - chrono::Duration::days(6))
        .await
        .unwrap();
    assert_eq!(first.warned, vec![(sandbox.id.clone(), 7)]);
    let repeat = sandboxes
        .warning_sweep(expires - chrono::Duration::days(5))
        .await
        .unwrap();
    assert!(repeat.warned.is_empty());

    let last_day = sandboxes
        .warning_sweep(expires - chrono::Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(last_day.warned, vec![(sandbox.id.clone(), 1)]);
    assert_eq!(h.notifications.of_kind(NotificationKind::ExpiryWarning).len(), 2);

    let not_yet = sandboxes
        .expire_sweep(expires - chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert!(not_yet.expired.is_empty());

    let swept = sandboxes
        .expire_sweep(expires + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(swept.expired, vec![sandbox.id.clone()]);
    let stored = sandboxes.get(&owner(), &sandbox.id).unwrap();
    assert_eq!(stored.status(), SandboxStatus::Expired);
    let env = sandbox.environment_id.clone().unwrap();
    assert!(h.platform.with(|s| s.deprovisioned.contains(&env)));

    let again = sandboxes
        .expire_sweep(expires + chrono::Duration::days(1))
        .await
        .unwrap();
    assert!(again.expired.is_empty());
}

#[tokio::test]
async fn test_extend_resets_warnings() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    let sandboxes = h.engine.sandboxes();
    sandboxes
        .warning_sweep(sandbox.expires_at - chrono::Duration::days(6))
        .await
        .unwrap();

    let extended = sandboxes
        .extend_expiration(&owner(), &sandbox.id, 7)
        .await
        .unwrap();
    assert_eq!(extended.expires_at, sandbox.expires_at + chrono::Duration::days(7));
    assert!(extended.expiry_warnings_sent.is_empty());

    let too_long = sandboxes.extend_expiration(&owner(), &sandbox.id, 365).await;
    assert_eq!(assert_err!(too_long).kind(), ExErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_abandon_update_and_visibility() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    let sandboxes = h.engine.sandboxes();

    let hidden = sandboxes.get(&outsider(), &sandbox.id);
    assert_eq!(assert_err!(hidden).kind(), ExErrorKind::NotFound);

    let renamed = sandboxes
        .update(
            &owner(),
            &sandbox.id,
            SandboxUpdate {
                name: Some("checkout v2".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "checkout v2");

    let colleague = changegate_core::model::Actor::member("someone-else", ORG);
    let denied = sandboxes.abandon(&colleague, &sandbox.id).await;
    assert_eq!(assert_err!(denied).kind(), ExErrorKind::Forbidden);

    let abandoned = sandboxes.abandon(&owner(), &sandbox.id).await.unwrap();
    assert_eq!(abandoned.status(), SandboxStatus::Abandoned);
    let branch = sandbox.platform_branch.clone().unwrap();
    assert!(h.platform.with(|s| s.deleted_branches.contains(&branch)));
    assert!(h.vcs.state.lock().unwrap().deleted_branches.contains(&branch));

    let twice = sandboxes.abandon(&owner(), &sandbox.id).await;
    assert_eq!(assert_err!(twice).kind(), ExErrorKind::InvalidTransition);

    let stats = sandboxes.stats(&owner(), 7).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.open, 0);
}

#[tokio::test]
async fn test_resource_usage_reports_environment() {
    let h = Harness::new();
    let sandbox = h.active_sandbox(MENDIX_APP).await;
    let usage = h
        .engine
        .sandboxes()
        .resource_usage(&owner(), &sandbox.id)
        .await
        .unwrap();
    assert_eq!(usage.memory_mb, 512);
}
