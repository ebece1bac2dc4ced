//! Sandbox state machine
//!
//! ```text
//! PROVISIONING -> ACTIVE <-> CHANGES_REQUESTED -> PENDING_REVIEW -> MERGED
//!                   ^ |                                 |
//!                   | v                                 v
//!                SUSPENDED                      CHANGES_REQUESTED
//! ```
//!
//! Terminal exits (ABANDONED, REJECTED, EXPIRED, FAILED, DELETED) are
//! reachable from PROVISIONING, ACTIVE and PENDING_REVIEW; SUSPENDED and
//! CHANGES_REQUESTED may leave through ABANDONED, EXPIRED, FAILED or DELETED.
//! A FAILED sandbox may still be DELETED.

use chrono::{DateTime, Utc};

use crate::errors::{GateError, Result};
use crate::model::{ConflictResolution, ConflictStatus, Sandbox, SandboxStatus, Snapshot};

impl SandboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SandboxStatus::Merged
                | SandboxStatus::Abandoned
                | SandboxStatus::Rejected
                | SandboxStatus::Expired
                | SandboxStatus::Failed
                | SandboxStatus::Deleted
        )
    }

    /// Statuses that hold a quota slot
    pub fn counts_toward_quota(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses in which sync and submit may run
    pub fn accepts_edits(&self) -> bool {
        matches!(
            self,
            SandboxStatus::Active | SandboxStatus::ChangesRequested
        )
    }

    pub fn can_transition_to(&self, to: SandboxStatus) -> bool {
        use SandboxStatus::*;

        let terminal_exit = matches!(to, Abandoned | Rejected | Expired | Failed | Deleted);
        let soft_exit = matches!(to, Abandoned | Expired | Failed | Deleted);

        match self {
            Provisioning => to == Active || terminal_exit,
            Active => matches!(to, Suspended | ChangesRequested | PendingReview) || terminal_exit,
            Suspended => to == Active || soft_exit,
            ChangesRequested => matches!(to, Active | PendingReview) || soft_exit,
            PendingReview => matches!(to, Merged | ChangesRequested) || terminal_exit,
            Failed => to == Deleted,
            Merged | Abandoned | Rejected | Expired | Deleted => false,
        }
    }
}

/// Check a single transition
///
/// # Errors
///
/// Returns `InvalidTransition` when `from -> to` is not an edge of the machine.
pub fn validate_transition(from: SandboxStatus, to: SandboxStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(GateError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Base pointers captured when provisioning finishes
#[derive(Debug, Clone)]
pub struct ProvisionedWorkspace {
    pub environment_id: String,
    pub platform_branch: String,
    pub vcs_branch: String,
    pub base_revision: String,
    pub base_commit: String,
    pub base_snapshot: Snapshot,
}

impl Sandbox {
    /// Move to `to`, returning the previous status
    ///
    /// # Errors
    ///
    /// Returns `SandboxTerminal` when leaving a terminal status that has no
    /// exits, or `InvalidTransition` for any other illegal edge.
    pub fn transition_to(&mut self, to: SandboxStatus) -> Result<SandboxStatus> {
        let from = self.status;
        if from.is_terminal() && !from.can_transition_to(to) {
            return Err(GateError::SandboxTerminal {
                sandbox_id: self.id.clone(),
                status: from.to_string(),
            });
        }
        validate_transition(from, to)?;
        self.status = to;
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Fail with an error visible to the owner
    ///
    /// # Errors
    ///
    /// Returns a transition error if the sandbox cannot fail from its status.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition_to(SandboxStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Record base pointers and become ACTIVE
    ///
    /// # Errors
    ///
    /// Returns a transition error unless the sandbox is PROVISIONING.
    pub fn complete_provisioning(&mut self, workspace: ProvisionedWorkspace) -> Result<()> {
        if self.status != SandboxStatus::Provisioning {
            return Err(GateError::InvalidTransition {
                from: self.status.to_string(),
                to: SandboxStatus::Active.to_string(),
            });
        }
        self.transition_to(SandboxStatus::Active)?;
        self.environment_id = Some(workspace.environment_id);
        self.platform_branch = Some(workspace.platform_branch);
        self.vcs_branch = Some(workspace.vcs_branch);
        self.latest_revision = Some(workspace.base_revision.clone());
        self.base_revision = Some(workspace.base_revision);
        self.latest_commit = Some(workspace.base_commit.clone());
        self.base_commit = Some(workspace.base_commit);
        self.last_snapshot = Some(workspace.base_snapshot);
        self.last_synced_at = Some(self.updated_at);
        Ok(())
    }

    /// Reject operations that need an editable sandbox
    ///
    /// # Errors
    ///
    /// Returns `SandboxTerminal` for terminal sandboxes and
    /// `InvalidTransition` for other non-editable statuses.
    pub fn ensure_accepts_edits(&self, op: &str) -> Result<()> {
        if self.status.accepts_edits() {
            return Ok(());
        }
        if self.status.is_terminal() {
            return Err(GateError::SandboxTerminal {
                sandbox_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        Err(GateError::InvalidTransition {
            from: self.status.to_string(),
            to: op.to_string(),
        })
    }

    /// A sync from an already-recorded revision changes nothing
    pub fn is_sync_noop(&self, revision: &str) -> bool {
        self.latest_revision.as_deref() == Some(revision)
    }

    /// Advance the latest pointers after a successful sync
    ///
    /// # Errors
    ///
    /// Returns an error unless the sandbox accepts edits.
    pub fn record_sync(
        &mut self,
        revision: String,
        commit: String,
        snapshot: Snapshot,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_accepts_edits("sync")?;
        self.latest_revision = Some(revision);
        self.latest_commit = Some(commit);
        self.last_snapshot = Some(snapshot);
        self.last_synced_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Trunk touched paths this sandbox also touched
    pub fn mark_conflicts(&mut self, paths: Vec<String>) {
        self.conflict_status = ConflictStatus::NeedsResolution;
        self.conflicts = paths;
        self.updated_at = Utc::now();
    }

    /// Trunk moved but without overlap; never downgrades NEEDS_RESOLUTION
    pub fn mark_potential_conflict(&mut self) {
        if self.conflict_status != ConflictStatus::NeedsResolution {
            self.conflict_status = ConflictStatus::Potential;
            self.updated_at = Utc::now();
        }
    }

    /// Gate for submit-for-review
    ///
    /// # Errors
    ///
    /// Returns `ConflictUnresolved` while conflicts await resolution, or a
    /// transition error if the sandbox is not editable.
    pub fn ensure_submittable(&self) -> Result<()> {
        self.ensure_accepts_edits("submit")?;
        if self.conflict_status == ConflictStatus::NeedsResolution {
            return Err(GateError::ConflictUnresolved {
                sandbox_id: self.id.clone(),
                paths: self.conflicts.clone(),
            });
        }
        Ok(())
    }

    /// Move to PENDING_REVIEW
    ///
    /// # Errors
    ///
    /// Same as [`Sandbox::ensure_submittable`].
    pub fn submit_for_review(&mut self) -> Result<()> {
        self.ensure_submittable()?;
        self.transition_to(SandboxStatus::PendingReview)?;
        Ok(())
    }

    /// Record a reviewer's resolution and return to ACTIVE
    ///
    /// # Errors
    ///
    /// Returns `NoConflictToResolve` unless conflicts await resolution.
    pub fn resolve_conflict(&mut self, mut resolution: ConflictResolution) -> Result<()> {
        if self.conflict_status != ConflictStatus::NeedsResolution {
            return Err(GateError::NoConflictToResolve {
                sandbox_id: self.id.clone(),
            });
        }
        if self.status != SandboxStatus::Active {
            self.transition_to(SandboxStatus::Active)?;
        }
        resolution.paths = std::mem::take(&mut self.conflicts);
        self.conflict_resolution = Some(resolution);
        self.conflict_status = ConflictStatus::Resolved;
        self.updated_at = Utc::now();
        Ok(())
    }
}
