//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use changegate_core::errors::{ExError, ExErrorKind};
use changegate_core::sandbox::{ExpiryPolicy, QuotaLimits};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::Result;

/// Upper bounds for connector calls, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Catalog lookups, branch checks, status polls
    pub metadata_secs: u64,
    pub export_secs: u64,
    pub commit_secs: u64,
    pub provision_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            metadata_secs: 30,
            export_secs: 300,
            commit_secs: 60,
            provision_secs: 600,
        }
    }
}

impl TimeoutConfig {
    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_secs)
    }

    pub fn export(&self) -> Duration {
        Duration::from_secs(self.export_secs)
    }

    pub fn commit(&self) -> Duration {
        Duration::from_secs(self.commit_secs)
    }

    pub fn provision(&self) -> Duration {
        Duration::from_secs(self.provision_secs)
    }
}

/// Environment readiness polling after a provision request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    /// Background provisioning workers
    pub workers: usize,
    /// Pending provisioning jobs before `create` waits for a slot
    pub queue_capacity: usize,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            poll_attempts: 30,
            workers: 2,
            queue_capacity: 64,
        }
    }
}

impl ProvisioningConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quotas: QuotaLimits,
    pub expiry: ExpiryPolicy,
    pub timeouts: TimeoutConfig,
    pub provisioning: ProvisioningConfig,
    /// Append every assessment to `risk_assessment_log` instead of only
    /// overwriting the latest
    pub assessment_history: bool,
    pub sweeps: SweepConfig,
}

/// Background expiry sweeps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::InvalidInput)
                .with_op("config_parse")
                .with_message(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("config_load")
                .with_message(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("config_validate")
                .with_message(reason.to_string()))
        };
        if self.provisioning.workers == 0 {
            return invalid("provisioning.workers must be at least 1");
        }
        if self.provisioning.queue_capacity == 0 {
            return invalid("provisioning.queue_capacity must be at least 1");
        }
        if self.expiry.max_extension_days == 0 {
            return invalid("expiry.max_extension_days must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.quotas.per_organization, 10);
        assert_eq!(config.quotas.clones_per_source_app, 2);
        assert_eq!(config.expiry.team_days, 30);
        assert_eq!(config.expiry.warning_thresholds_days, vec![7, 1]);
        assert_eq!(config.timeouts.provision_secs, 600);
        assert_eq!(config.provisioning.poll_attempts, 30);
        assert!(!config.assessment_history);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            assessment_history = true

            [quotas]
            per_organization = 3

            [timeouts]
            export_secs = 12
            "#,
        )
        .unwrap();
        assert!(config.assessment_history);
        assert_eq!(config.quotas.per_organization, 3);
        assert_eq!(config.quotas.personal, 5);
        assert_eq!(config.timeouts.export(), Duration::from_secs(12));
        assert_eq!(config.timeouts.commit_secs, 60);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = EngineConfig::from_toml_str("[provisioning]\nworkers = 0").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changegate.toml");
        std::fs::write(&path, "[expiry]\nmax_extension_days = 30\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.expiry.max_extension_days, 30);
    }
}
