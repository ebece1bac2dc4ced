//! Sandbox quotas
//!
//! Checked before any external call is made for a new sandbox.

use serde::{Deserialize, Serialize};

use crate::errors::{GateError, Result};
use crate::model::SandboxType;

/// Caps on sandboxes that hold a quota slot (any non-terminal status)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub per_organization: u32,
    pub personal: u32,
    pub team: u32,
    pub feature: u32,
    pub clone: u32,
    pub clones_per_source_app: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            per_organization: 10,
            personal: 5,
            team: 5,
            feature: 5,
            clone: 3,
            clones_per_source_app: 2,
        }
    }
}

impl QuotaLimits {
    pub fn for_type(&self, sandbox_type: SandboxType) -> u32 {
        match sandbox_type {
            SandboxType::Personal => self.personal,
            SandboxType::Team => self.team,
            SandboxType::Feature => self.feature,
            SandboxType::Clone => self.clone,
        }
    }
}

/// Current slot usage relevant to one create request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub organization: u32,
    pub of_type: u32,
    /// Clones of the requested source app; zero for non-clone requests
    pub of_source_app: u32,
}

/// Organization cap, then per-type cap, then clone-per-source-app cap
///
/// # Errors
///
/// Returns `QuotaExceeded` naming the first exhausted scope.
pub fn check_quota(
    limits: &QuotaLimits,
    usage: &QuotaUsage,
    sandbox_type: SandboxType,
) -> Result<()> {
    if usage.organization >= limits.per_organization {
        return Err(GateError::QuotaExceeded {
            scope: "organization".to_string(),
            limit: limits.per_organization,
        });
    }
    let type_limit = limits.for_type(sandbox_type);
    if usage.of_type >= type_limit {
        return Err(GateError::QuotaExceeded {
            scope: format!("{} sandboxes", sandbox_type),
            limit: type_limit,
        });
    }
    if sandbox_type == SandboxType::Clone && usage.of_source_app >= limits.clones_per_source_app {
        return Err(GateError::QuotaExceeded {
            scope: "clones per source app".to_string(),
            limit: limits.clones_per_source_app,
        });
    }
    Ok(())
}
