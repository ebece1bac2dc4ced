//! Risk scoring
//!
//! Combines impact, policy and formula analyses into a single 0 to 100 score,
//! a level, and an auto-block decision. Scoring is a pure function of its
//! inputs: re-running it on the same inputs yields the same assessment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::model::ImpactLevel;
use crate::impact::ImpactAnalysis;
use crate::policy::{FormulaResult, PolicyResult};

/// Risk level uses the same four-step scale as impact
pub type RiskLevel = ImpactLevel;

const COMPLEXITY_WEIGHT: f64 = 0.4;
const BREAKING_POINTS: f64 = 10.0;
const BREAKING_CAP: f64 = 30.0;
const DEPENDENCY_POINTS: f64 = 3.0;
const DEPENDENCY_CAP: f64 = 15.0;
const VIOLATION_POINTS: f64 = 10.0;
const VIOLATION_CAP: f64 = 20.0;
const FORMULA_COMPLEXITY_WEIGHT: f64 = 0.2;
const DANGER_SIGNAL_POINTS: f64 = 5.0;
const FORMULA_CAP: f64 = 20.0;
const MAX_SCORE: f64 = 100.0;

/// Points a risk factor of the given severity adds
pub fn severity_points(severity: ImpactLevel) -> f64 {
    match severity {
        ImpactLevel::Critical => 15.0,
        ImpactLevel::High => 10.0,
        ImpactLevel::Medium => 5.0,
        ImpactLevel::Low => 2.0,
    }
}

/// Level for a final score
pub fn level_for_score(score: u32) -> RiskLevel {
    match score {
        75.. => ImpactLevel::Critical,
        50..=74 => ImpactLevel::High,
        25..=49 => ImpactLevel::Medium,
        _ => ImpactLevel::Low,
    }
}

/// One term of the score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub name: String,
    pub points: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0 to 100
    pub score: u32,
    pub level: RiskLevel,
    pub auto_block: bool,
    /// Policy ids whose required action is `block`
    pub auto_block_rules: Vec<String>,
    pub contributing_factors: Vec<ContributingFactor>,
    pub policy_passed: bool,
    pub violated_policy_ids: Vec<String>,
    /// Analyses that fell back to zeroed results (`impact`, `policy`, `formula`)
    #[serde(default)]
    pub degraded_components: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_components.is_empty()
    }
}

/// Everything the scorer reads
#[derive(Debug, Clone)]
pub struct RiskInputs<'a> {
    pub impact: &'a ImpactAnalysis,
    pub policy: &'a PolicyResult,
    pub formula: Option<&'a FormulaResult>,
    /// Components other than impact that degraded before scoring
    pub degraded: Vec<String>,
}

impl<'a> RiskInputs<'a> {
    pub fn new(impact: &'a ImpactAnalysis, policy: &'a PolicyResult) -> Self {
        Self {
            impact,
            policy,
            formula: None,
            degraded: Vec::new(),
        }
    }

    pub fn with_formula(mut self, formula: Option<&'a FormulaResult>) -> Self {
        self.formula = formula;
        self
    }

    pub fn with_degraded(mut self, component: impl Into<String>) -> Self {
        self.degraded.push(component.into());
        self
    }
}

/// Score a change
pub fn score_risk(inputs: &RiskInputs<'_>, assessed_at: DateTime<Utc>) -> RiskAssessment {
    let impact = inputs.impact;
    let mut factors: Vec<ContributingFactor> = Vec::new();
    let mut push = |name: &str, points: f64, detail: String| {
        if points > 0.0 {
            factors.push(ContributingFactor {
                name: name.to_string(),
                points,
                detail,
            });
        }
    };

    push(
        "impact_complexity",
        COMPLEXITY_WEIGHT * impact.complexity_score as f64,
        format!("complexity score {}", impact.complexity_score),
    );
    push(
        "breaking_changes",
        (BREAKING_POINTS * impact.breaking_changes as f64).min(BREAKING_CAP),
        format!("{} breaking change(s)", impact.breaking_changes),
    );
    push(
        "dependencies",
        (DEPENDENCY_POINTS * impact.dependencies.len() as f64).min(DEPENDENCY_CAP),
        format!("{} dependent component(s)", impact.dependencies.len()),
    );
    for factor in &impact.risk_factors {
        push(
            &format!("risk_factor:{}", factor.factor),
            severity_points(factor.severity),
            factor.description.clone(),
        );
    }
    push(
        "policy_violations",
        (VIOLATION_POINTS * inputs.policy.violated_policy_ids.len() as f64).min(VIOLATION_CAP),
        format!(
            "{} violated polic(ies)",
            inputs.policy.violated_policy_ids.len()
        ),
    );
    if let Some(formula) = inputs.formula {
        push(
            "formula_complexity",
            (FORMULA_COMPLEXITY_WEIGHT * formula.complexity_score as f64
                + DANGER_SIGNAL_POINTS * formula.danger_signals as f64)
                .min(FORMULA_CAP),
            format!(
                "formula complexity {} with {} danger signal(s)",
                formula.complexity_score, formula.danger_signals
            ),
        );
    }

    let raw: f64 = factors.iter().map(|f| f.points).sum();
    let score = raw.min(MAX_SCORE).round() as u32;

    let auto_block_rules = inputs.policy.blocking_policy_ids();
    let auto_block = !auto_block_rules.is_empty();

    let mut level = level_for_score(score);
    if impact.overall_impact == ImpactLevel::Critical || impact.has_critical_factor() {
        level = level.max(ImpactLevel::High);
    }
    if auto_block {
        level = ImpactLevel::Critical;
    }

    let mut degraded_components = Vec::new();
    if impact.degraded {
        degraded_components.push("impact".to_string());
    }
    for component in &inputs.degraded {
        if !degraded_components.contains(component) {
            degraded_components.push(component.clone());
        }
    }

    RiskAssessment {
        score,
        level,
        auto_block,
        auto_block_rules,
        contributing_factors: factors,
        policy_passed: inputs.policy.passed,
        violated_policy_ids: inputs.policy.violated_policy_ids.clone(),
        degraded_components,
        assessed_at,
    }
}
