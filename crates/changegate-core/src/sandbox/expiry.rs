//! Sandbox expiration rules

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{GateError, Result};
use crate::model::{Sandbox, SandboxStatus, SandboxType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryPolicy {
    pub personal_days: u32,
    pub team_days: u32,
    pub feature_days: u32,
    pub clone_days: u32,
    /// Longest lifetime a create or extend request may ask for
    pub max_extension_days: u32,
    /// Days-before-expiry at which the owner is warned
    pub warning_thresholds_days: Vec<u32>,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            personal_days: 7,
            team_days: 30,
            feature_days: 14,
            clone_days: 7,
            max_extension_days: 90,
            warning_thresholds_days: vec![7, 1],
        }
    }
}

impl ExpiryPolicy {
    pub fn default_days(&self, sandbox_type: SandboxType) -> u32 {
        match sandbox_type {
            SandboxType::Personal => self.personal_days,
            SandboxType::Team => self.team_days,
            SandboxType::Feature => self.feature_days,
            SandboxType::Clone => self.clone_days,
        }
    }

    /// Expiry for a new sandbox
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a requested duration is zero or longer
    /// than `max_extension_days`.
    pub fn initial_expiry(
        &self,
        sandbox_type: SandboxType,
        requested_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let days = match requested_days {
            Some(days) => self.check_days("duration_days", days)?,
            None => self.default_days(sandbox_type),
        };
        Ok(now + Duration::days(days as i64))
    }

    /// Push expiry out by `days` from the later of now and the current expiry.
    ///
    /// Sent warnings are cleared so the new deadline is announced again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero or oversized extension, or when the
    /// resulting lifetime from now would exceed `max_extension_days`, and
    /// `SandboxTerminal` for terminal sandboxes.
    pub fn extend(&self, sandbox: &mut Sandbox, days: u32, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if sandbox.status().is_terminal() {
            return Err(GateError::SandboxTerminal {
                sandbox_id: sandbox.id.clone(),
                status: sandbox.status().to_string(),
            });
        }
        let days = self.check_days("days", days)?;
        let from = sandbox.expires_at.max(now);
        let new_expiry = from + Duration::days(days as i64);
        if new_expiry - now > Duration::days(self.max_extension_days as i64) {
            return Err(GateError::InvalidInput {
                field: "days".to_string(),
                reason: format!(
                    "sandbox may not live more than {} days from now",
                    self.max_extension_days
                ),
            });
        }
        sandbox.expires_at = new_expiry;
        sandbox.expiry_warnings_sent.clear();
        sandbox.updated_at = now;
        Ok(new_expiry)
    }

    /// Most urgent warning threshold that is due and not yet sent
    pub fn due_warning(&self, sandbox: &Sandbox, now: DateTime<Utc>) -> Option<u32> {
        if !matches!(
            sandbox.status(),
            SandboxStatus::Active | SandboxStatus::Suspended | SandboxStatus::ChangesRequested
        ) {
            return None;
        }
        let remaining = sandbox.expires_at - now;
        if remaining <= Duration::zero() {
            return None;
        }
        let mut thresholds = self.warning_thresholds_days.clone();
        thresholds.sort_unstable();
        thresholds
            .into_iter()
            .find(|t| remaining <= Duration::days(*t as i64))
            .filter(|t| !sandbox.expiry_warnings_sent.contains(t))
    }

    /// Mark `threshold` and every larger threshold as sent
    pub fn record_warning(&self, sandbox: &mut Sandbox, threshold: u32) {
        for t in &self.warning_thresholds_days {
            if *t >= threshold && !sandbox.expiry_warnings_sent.contains(t) {
                sandbox.expiry_warnings_sent.push(*t);
            }
        }
        sandbox.expiry_warnings_sent.sort_unstable();
    }

    fn check_days(&self, field: &str, days: u32) -> Result<u32> {
        if days == 0 || days > self.max_extension_days {
            return Err(GateError::InvalidInput {
                field: field.to_string(),
                reason: format!("must be between 1 and {} days", self.max_extension_days),
            });
        }
        Ok(days)
    }
}

/// ACTIVE or SUSPENDED sandboxes past their expiry
pub fn is_due_for_expiry(sandbox: &Sandbox, now: DateTime<Utc>) -> bool {
    matches!(
        sandbox.status(),
        SandboxStatus::Active | SandboxStatus::Suspended
    ) && sandbox.expires_at <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, SandboxRequest};

    fn sandbox(expires_at: DateTime<Utc>) -> Sandbox {
        let mut sb = Sandbox::new(
            "sb-1".into(),
            SandboxRequest {
                app_id: Some("app".into()),
                source_app_id: None,
                name: "x".into(),
                description: None,
                sandbox_type: SandboxType::Team,
                duration_days: None,
            },
            "u".into(),
            "org".into(),
            Platform::PowerPlatform,
            expires_at,
        );
        sb.transition_to(SandboxStatus::Active).unwrap();
        sb
    }

    #[test]
    fn test_initial_expiry_uses_type_default() {
        let policy = ExpiryPolicy::default();
        let now = Utc::now();
        assert_eq!(
            policy.initial_expiry(SandboxType::Team, None, now).unwrap(),
            now + Duration::days(30)
        );
        assert_eq!(
            policy.initial_expiry(SandboxType::Personal, Some(3), now).unwrap(),
            now + Duration::days(3)
        );
        assert!(policy.initial_expiry(SandboxType::Personal, Some(0), now).is_err());
        assert!(policy.initial_expiry(SandboxType::Personal, Some(91), now).is_err());
    }

    #[test]
    fn test_warnings_sent_once_most_urgent_first() {
        let policy = ExpiryPolicy::default();
        let now = Utc::now();
        let mut sb = sandbox(now + Duration::days(5));
        assert_eq!(policy.due_warning(&sb, now), Some(7));
        policy.record_warning(&mut sb, 7);
        assert_eq!(policy.due_warning(&sb, now), None);

        let later = now + Duration::hours(4 * 24 + 12);
        assert_eq!(policy.due_warning(&sb, later), Some(1));
        policy.record_warning(&mut sb, 1);
        assert_eq!(policy.due_warning(&sb, later), None);
        assert_eq!(sb.expiry_warnings_sent, vec![1, 7]);
    }

    #[test]
    fn test_late_first_warning_suppresses_larger() {
        let policy = ExpiryPolicy::default();
        let now = Utc::now();
        let mut sb = sandbox(now + Duration::hours(12));
        assert_eq!(policy.due_warning(&sb, now), Some(1));
        policy.record_warning(&mut sb, 1);
        assert_eq!(policy.due_warning(&sb, now), None);
    }

    #[test]
    fn test_extend_clears_warnings_and_caps() {
        let policy = ExpiryPolicy::default();
        let now = Utc::now();
        let mut sb = sandbox(now + Duration::days(2));
        policy.record_warning(&mut sb, 7);
        let new_expiry = policy.extend(&mut sb, 10, now).unwrap();
        assert_eq!(new_expiry, now + Duration::days(12));
        assert!(sb.expiry_warnings_sent.is_empty());
        assert!(policy.extend(&mut sb, 85, now).is_err());
    }

    #[test]
    fn test_due_for_expiry() {
        let now = Utc::now();
        let sb = sandbox(now - Duration::minutes(1));
        assert!(is_due_for_expiry(&sb, now));
        assert!(!is_due_for_expiry(&sandbox(now + Duration::days(1)), now));
    }
}
