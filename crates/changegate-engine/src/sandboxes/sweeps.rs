//! Periodic expiry and expiry-warning sweeps

use std::time::{Duration, Instant};

use changegate_core::model::SandboxStatus;
use changegate_core::sandbox::is_due_for_expiry;
use changegate_core::{log_op_end, log_op_start};
use changegate_store::{SandboxFilter, SqliteRepo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use super::{SandboxOrchestrator, SYSTEM_ACTOR};
use crate::connectors::NotificationKind;
use crate::errors::Result;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sandboxes moved to EXPIRED
    pub expired: Vec<String>,
    /// (sandbox id, threshold in days) for each warning sent
    pub warned: Vec<(String, u32)>,
    /// Sandboxes skipped because another writer got there first or a
    /// notification failed; they are retried on the next sweep
    pub skipped: Vec<String>,
}

impl SandboxOrchestrator {
    /// Expire ACTIVE and SUSPENDED sandboxes whose expiry has passed
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let start = Instant::now();
        log_op_start!("sandbox_expire_sweep");

        let inner = &self.inner;
        let filter = SandboxFilter::default()
            .with_statuses(&[SandboxStatus::Active, SandboxStatus::Suspended]);
        let candidates = inner
            .db
            .with(|conn| SqliteRepo::list_sandboxes(conn, &filter))?;

        let mut report = SweepReport::default();
        for mut sandbox in candidates
            .into_iter()
            .filter(|s| is_due_for_expiry(s, now))
        {
            let before = sandbox.transition_to(SandboxStatus::Expired)?;
            if inner.persist(&sandbox, before).is_err() {
                report.skipped.push(sandbox.id.clone());
                continue;
            }
            // Environments go; branches stay so the work can be recovered
            inner.release_resources(&sandbox, None, false).await;
            inner
                .audit(
                    SYSTEM_ACTOR,
                    "sandbox.expire",
                    &sandbox,
                    Some(before),
                    Some(json!({ "expires_at": sandbox.expires_at })),
                )
                .await;
            inner
                .notify(
                    &sandbox.created_by_id,
                    NotificationKind::Expired,
                    &sandbox.id,
                    format!("Sandbox '{}' has expired", sandbox.name),
                )
                .await;
            report.expired.push(sandbox.id);
        }

        log_op_end!(
            "sandbox_expire_sweep",
            duration_ms = start.elapsed().as_millis() as u64,
            expired = report.expired.len()
        );
        Ok(report)
    }

    /// Send each due expiry warning once per deadline
    pub async fn warning_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let start = Instant::now();
        log_op_start!("sandbox_warning_sweep");

        let inner = &self.inner;
        let filter = SandboxFilter::default().with_statuses(&[
            SandboxStatus::Active,
            SandboxStatus::Suspended,
            SandboxStatus::ChangesRequested,
        ]);
        let candidates = inner
            .db
            .with(|conn| SqliteRepo::list_sandboxes(conn, &filter))?;

        let mut report = SweepReport::default();
        for mut sandbox in candidates {
            let Some(threshold) = inner.config.expiry.due_warning(&sandbox, now) else {
                continue;
            };
            let days_left = (sandbox.expires_at - now).num_hours().max(0) as f64 / 24.0;
            let sent = inner
                .notify(
                    &sandbox.created_by_id,
                    NotificationKind::ExpiryWarning,
                    &sandbox.id,
                    format!(
                        "Sandbox '{}' expires in {:.1} day(s) on {}",
                        sandbox.name,
                        days_left,
                        sandbox.expires_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .await;
            if !sent {
                report.skipped.push(sandbox.id.clone());
                continue;
            }
            inner.config.expiry.record_warning(&mut sandbox, threshold);
            if inner.persist(&sandbox, sandbox.status()).is_err() {
                report.skipped.push(sandbox.id.clone());
                continue;
            }
            report.warned.push((sandbox.id, threshold));
        }

        log_op_end!(
            "sandbox_warning_sweep",
            duration_ms = start.elapsed().as_millis() as u64,
            warned = report.warned.len()
        );
        Ok(report)
    }

    /// Run both sweeps every `sweeps.interval_secs` until the task is aborted
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let period = Duration::from_secs(self.inner.config.sweeps.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                if let Err(err) = orchestrator.expire_sweep(now).await {
                    tracing::error!(error = %err, "expire sweep failed");
                }
                if let Err(err) = orchestrator.warning_sweep(now).await {
                    tracing::error!(error = %err, "warning sweep failed");
                }
            }
        })
    }
}
