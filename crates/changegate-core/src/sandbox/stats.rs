use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ConflictStatus, Sandbox};

/// Aggregate view over an organization's sandboxes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStats {
    pub total: usize,
    /// Sandboxes holding a quota slot
    pub open: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub expiring_soon: usize,
    pub needs_resolution: usize,
}

/// Count sandboxes; "expiring soon" means open and expiring within `window_days`
pub fn compute_stats(sandboxes: &[Sandbox], now: DateTime<Utc>, window_days: u32) -> SandboxStats {
    let horizon = now + Duration::days(window_days as i64);
    let mut stats = SandboxStats::default();

    for sb in sandboxes {
        stats.total += 1;
        *stats.by_status.entry(sb.status().to_string()).or_default() += 1;
        *stats.by_type.entry(sb.sandbox_type.to_string()).or_default() += 1;
        if sb.status().counts_toward_quota() {
            stats.open += 1;
            if sb.expires_at <= horizon {
                stats.expiring_soon += 1;
            }
        }
        if sb.conflict_status() == ConflictStatus::NeedsResolution {
            stats.needs_resolution += 1;
        }
    }
    stats
}
