//! Per-sandbox progress channels
//!
//! Long operations publish stage events; callers subscribe per sandbox.
//! A channel exists only while someone is subscribed to it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 64;

/// Pipeline stage a progress event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    // provisioning
    Provisioning,
    CreatingBranches,
    CapturingBaseline,
    // sync
    Validating,
    VerifyingBranch,
    Exporting,
    Uploading,
    Committing,
    DetectingChanges,
    // submit
    CheckingConflicts,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Provisioning => "provisioning",
            Stage::CreatingBranches => "creating_branches",
            Stage::CapturingBaseline => "capturing_baseline",
            Stage::Validating => "validating",
            Stage::VerifyingBranch => "verifying_branch",
            Stage::Exporting => "exporting",
            Stage::Uploading => "uploading",
            Stage::Committing => "committing",
            Stage::DetectingChanges => "detecting_changes",
            Stage::CheckingConflicts => "checking_conflicts",
            Stage::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub sandbox_id: String,
    /// `provision`, `sync` or `submit`
    pub operation: String,
    pub stage: Stage,
    pub status: ProgressStatus,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Fan-out of progress events keyed by sandbox id
#[derive(Debug, Clone, Default)]
pub struct ProgressHub {
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving events for `sandbox_id`
    pub fn subscribe(&self, sandbox_id: &str) -> ProgressSubscription {
        let receiver = self
            .channels
            .entry(sandbox_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        ProgressSubscription {
            sandbox_id: sandbox_id.to_string(),
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Deliver to current subscribers; dropped when there are none
    pub fn publish(&self, event: ProgressEvent) {
        if let Some(sender) = self.channels.get(&event.sandbox_id) {
            let _ = sender.send(event);
        }
    }

    pub fn stage(
        &self,
        sandbox_id: &str,
        operation: &str,
        stage: Stage,
        status: ProgressStatus,
        message: Option<String>,
    ) {
        self.publish(ProgressEvent {
            sandbox_id: sandbox_id.to_string(),
            operation: operation.to_string(),
            stage,
            status,
            message,
            at: Utc::now(),
        });
    }

    /// Number of sandboxes with at least one live subscriber
    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }
}

/// Receiving end of one sandbox's progress; unsubscribes on drop
#[derive(Debug)]
pub struct ProgressSubscription {
    sandbox_id: String,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressSubscription {
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Next event; `None` once the hub is gone. Lagged events are skipped.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(sandbox_id = %self.sandbox_id, skipped, "progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.channels
            .remove_if(&self.sandbox_id, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_stages() {
        let hub = ProgressHub::new();
        let mut sub = hub.subscribe("sb-1");
        hub.stage("sb-1", "sync", Stage::Exporting, ProgressStatus::Running, None);
        hub.stage("sb-2", "sync", Stage::Exporting, ProgressStatus::Running, None);

        let event = sub.next().await.unwrap();
        assert_eq!(event.stage, Stage::Exporting);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_channel_removed_with_last_subscriber() {
        let hub = ProgressHub::new();
        let a = hub.subscribe("sb-1");
        let b = hub.subscribe("sb-1");
        assert_eq!(hub.active_channels(), 1);
        drop(a);
        assert_eq!(hub.active_channels(), 1);
        drop(b);
        assert_eq!(hub.active_channels(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = ProgressHub::new();
        hub.stage("sb-1", "sync", Stage::Complete, ProgressStatus::Completed, None);
        assert_eq!(hub.active_channels(), 0);
    }
}
