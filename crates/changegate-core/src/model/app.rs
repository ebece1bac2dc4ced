use changegate_core_types::Sensitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{GateError, Result};

/// Low-code platform an app is built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Formula-driven canvas/model apps; environments cannot be paused
    PowerPlatform,
    /// Model-driven apps; environments support start/stop
    Mendix,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::PowerPlatform => "power_platform",
            Platform::Mendix => "mendix",
        }
    }

    /// Parse a platform identifier
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown identifiers.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "power_platform" | "powerplatform" | "power-platform" => Ok(Platform::PowerPlatform),
            "mendix" => Ok(Platform::Mendix),
            other => Err(GateError::InvalidInput {
                field: "platform".to_string(),
                reason: format!("unknown platform '{}'", other),
            }),
        }
    }

    /// Whether sandbox environments on this platform can be stopped and resumed
    pub fn supports_pause(&self) -> bool {
        matches!(self, Platform::Mendix)
    }

    /// Expression language used by the platform's formulas
    pub fn formula_dialect(&self) -> FormulaDialect {
        match self {
            Platform::PowerPlatform => FormulaDialect::PowerFx,
            Platform::Mendix => FormulaDialect::MendixExpression,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formula language handed to the formula analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaDialect {
    PowerFx,
    MendixExpression,
}

/// An app as known to the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub platform: Platform,

    /// VCS repository holding exported snapshots
    pub repository: String,

    /// Trunk branch in the VCS repository
    pub trunk_branch: String,

    /// Token connectors present to the platform and VCS on this app's behalf
    #[serde(default, skip_serializing)]
    pub access_token: Option<Sensitive<String>>,
}

/// A registered component of an app (screen, flow, data source, ...)
///
/// Used by the impact analyzer to find what depends on a changed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub component_type: String,

    /// Location of the component inside the app definition
    pub path: String,

    #[serde(default)]
    pub metadata: Value,
}

impl Component {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        component_type: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            component_type: component_type.into(),
            path: path.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
