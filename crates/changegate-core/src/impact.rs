//! Impact analysis
//!
//! Cross-references a [`DiffResult`] against the app's registered components
//! to find dependents of removed or high-impact paths, then derives a
//! complexity score, a breaking-change count, risk factors and an overall
//! impact level.
//!
//! [`analyze_impact`] never fails: any internal error yields
//! [`ImpactAnalysis::empty`] flagged as degraded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

use crate::diff::engine::path_contains_any;
use crate::diff::model::{DiffResult, ImpactLevel, OpKind, Operation};
use crate::errors::{GateError, Result};
use crate::log_degraded;
use crate::model::Component;

/// Path keywords that mark any touching operation as breaking
pub const BREAKING_KEYWORDS: &[&str] = &[
    "schema",
    "interface",
    "contract",
    "api",
    "endpoint",
    "auth",
    "permission",
    "datasource",
    "connection",
];

/// A component that depends on a changed path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub component_id: String,
    pub reason: String,
    pub impact_level: ImpactLevel,
}

/// A threshold that was crossed during analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor: String,
    pub severity: ImpactLevel,
    pub description: String,
}

impl RiskFactor {
    fn new(factor: &str, severity: ImpactLevel, description: String) -> Self {
        Self {
            factor: factor.to_string(),
            severity,
            description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub overall_impact: ImpactLevel,
    /// 0 to 100
    pub complexity_score: u32,
    pub breaking_changes: u32,
    /// Registered components that depend on the changed paths
    pub affected_components: u32,
    pub dependencies: Vec<Dependency>,
    pub risk_factors: Vec<RiskFactor>,
    /// Set when analysis failed and this is a zeroed fallback
    #[serde(default)]
    pub degraded: bool,
}

impl ImpactAnalysis {
    /// Zeroed analysis used when the analyzer could not run
    pub fn empty() -> Self {
        Self {
            overall_impact: ImpactLevel::Low,
            complexity_score: 0,
            breaking_changes: 0,
            affected_components: 0,
            dependencies: Vec::new(),
            risk_factors: Vec::new(),
            degraded: true,
        }
    }

    pub fn has_critical_factor(&self) -> bool {
        self.risk_factors
            .iter()
            .any(|f| f.severity == ImpactLevel::Critical)
    }
}

/// Analyze impact, falling back to a degraded empty analysis on failure
pub fn analyze_impact(diff: &DiffResult, components: &[Component]) -> ImpactAnalysis {
    match try_analyze(diff, components) {
        Ok(analysis) => analysis,
        Err(err) => {
            log_degraded!("impact_analysis", err);
            ImpactAnalysis::empty()
        }
    }
}

/// Analyze impact, surfacing internal failures
///
/// # Errors
///
/// Returns `Analysis` if component metadata cannot be serialized for matching.
pub fn try_analyze(diff: &DiffResult, components: &[Component]) -> Result<ImpactAnalysis> {
    let removed: Vec<&Operation> = diff.operations_of(OpKind::Remove).collect();
    let modified: Vec<&Operation> = diff
        .operations_of(OpKind::Replace)
        .filter(|op| op.impact_level.is_high_or_critical())
        .collect();

    let dependencies = find_dependencies(&removed, &modified, components)?;
    let complexity_score = complexity_score(diff);
    let breaking_changes = count_breaking(diff);
    let risk_factors = risk_factors(diff, dependencies.len());

    let has_critical = risk_factors
        .iter()
        .any(|f| f.severity == ImpactLevel::Critical);
    let overall_impact = overall_impact(
        has_critical,
        complexity_score,
        breaking_changes,
        dependencies.len(),
    );

    Ok(ImpactAnalysis {
        overall_impact,
        complexity_score,
        breaking_changes,
        affected_components: dependencies.len() as u32,
        dependencies,
        risk_factors,
        degraded: false,
    })
}

/// Name of the entity an operation touched.
///
/// The last path segment, except for array indices where the element's own
/// `name` or `id` is used (falling back to the parent segment).
pub fn entity_name(op: &Operation) -> String {
    let segments = op.segments();
    let Some(last) = segments.last() else {
        return String::new();
    };
    if last.parse::<usize>().is_err() {
        return last.clone();
    }
    let named = op.old_value.as_ref().and_then(|v| {
        ["name", "id"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
    });
    named.unwrap_or_else(|| {
        segments
            .len()
            .checked_sub(2)
            .map(|i| segments[i].clone())
            .unwrap_or_default()
    })
}

fn find_dependencies(
    removed: &[&Operation],
    modified: &[&Operation],
    components: &[Component],
) -> Result<Vec<Dependency>> {
    let mut dependencies: Vec<Dependency> = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();

    let candidates = removed
        .iter()
        .map(|op| (op, ImpactLevel::Critical, "References deleted"))
        .chain(
            modified
                .iter()
                .map(|op| (op, ImpactLevel::High, "Depends on modified")),
        );

    for (op, level, verb) in candidates {
        let entity = entity_name(op);
        if entity.is_empty() {
            continue;
        }
        for component in components {
            if claimed.contains(&component.id) {
                continue;
            }
            if component_mentions(component, &entity)? {
                claimed.insert(component.id.clone());
                dependencies.push(Dependency {
                    component_id: component.id.clone(),
                    reason: format!("{} {}", verb, entity),
                    impact_level: level,
                });
            }
        }
    }
    Ok(dependencies)
}

fn component_mentions(component: &Component, entity: &str) -> Result<bool> {
    if component.path.contains(entity) || component.name.contains(entity) {
        return Ok(true);
    }
    if component.metadata.is_null() {
        return Ok(false);
    }
    let metadata = serde_json::to_string(&component.metadata).map_err(|e| GateError::Analysis {
        component: "impact".to_string(),
        reason: format!("component {} metadata: {}", component.id, e),
    })?;
    Ok(metadata.contains(entity))
}

/// `min(2×total, 40) + 5×deletions + 8×highOrCritical + 3×categories`, capped at 100
pub fn complexity_score(diff: &DiffResult) -> u32 {
    let total = diff.total_changes as u32;
    let high_or_critical = diff
        .operations
        .iter()
        .filter(|op| op.impact_level.is_high_or_critical())
        .count() as u32;
    let categories = diff.categories.len() as u32;

    let score = (2 * total).min(40) + 5 * diff.deleted as u32 + 8 * high_or_critical + 3 * categories;
    score.min(100)
}

/// Count breaking operations; each operation counts at most once
pub fn count_breaking(diff: &DiffResult) -> u32 {
    diff.operations
        .iter()
        .filter(|op| {
            op.kind == OpKind::Remove
                || (op.kind == OpKind::Replace && op.impact_level == ImpactLevel::Critical)
                || path_contains_any(&op.path, BREAKING_KEYWORDS)
        })
        .count() as u32
}

fn risk_factors(diff: &DiffResult, dependency_count: usize) -> Vec<RiskFactor> {
    let mut factors = Vec::new();

    if diff.total_changes > 20 {
        let severity = if diff.total_changes > 50 {
            ImpactLevel::Critical
        } else {
            ImpactLevel::High
        };
        factors.push(RiskFactor::new(
            "change_volume",
            severity,
            format!("{} changes in one revision", diff.total_changes),
        ));
    }

    if diff.deleted > 0 {
        let severity = if diff.deleted > 5 {
            ImpactLevel::High
        } else {
            ImpactLevel::Medium
        };
        factors.push(RiskFactor::new(
            "deletions",
            severity,
            format!("{} element(s) deleted", diff.deleted),
        ));
    }

    let critical_ops = diff
        .operations
        .iter()
        .filter(|op| op.impact_level == ImpactLevel::Critical)
        .count();
    if critical_ops > 0 {
        factors.push(RiskFactor::new(
            "critical_operations",
            ImpactLevel::Critical,
            format!("{} critical operation(s)", critical_ops),
        ));
    }

    if dependency_count > 0 {
        let severity = match dependency_count {
            1..=2 => ImpactLevel::Low,
            3..=10 => ImpactLevel::Medium,
            _ => ImpactLevel::High,
        };
        factors.push(RiskFactor::new(
            "affected_dependencies",
            severity,
            format!("{} dependent component(s)", dependency_count),
        ));
    }

    if diff.categories.len() > 3 {
        let names: BTreeSet<&str> = diff.categories.keys().map(String::as_str).collect();
        factors.push(RiskFactor::new(
            "wide_scope",
            ImpactLevel::Medium,
            format!(
                "wide scope: {} categories touched ({})",
                names.len(),
                names.into_iter().collect::<Vec<_>>().join(", ")
            ),
        ));
    }

    factors
}

fn overall_impact(
    has_critical_factor: bool,
    complexity: u32,
    breaking: u32,
    dependencies: usize,
) -> ImpactLevel {
    if has_critical_factor || (breaking > 0 && dependencies > 5) {
        ImpactLevel::Critical
    } else if complexity > 70 || breaking > 3 || dependencies > 10 {
        ImpactLevel::High
    } else if complexity > 40 || breaking > 0 || dependencies > 3 {
        ImpactLevel::Medium
    } else {
        ImpactLevel::Low
    }
}
