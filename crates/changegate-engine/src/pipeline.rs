//! Change-risk pipeline
//!
//! Impact, policy and formula analyses run concurrently; the scorer merges
//! them. Failures in any analysis degrade that input instead of failing
//! the assessment.

use std::sync::Arc;
use std::time::Instant;

use changegate_core::impact::analyze_impact;
use changegate_core::model::{Change, Platform};
use changegate_core::policy::{FormulaInput, PolicyResult};
use changegate_core::risk::{score_risk, RiskAssessment, RiskInputs};
use changegate_core::{log_degraded, log_op_end, log_op_start};
use chrono::Utc;

use crate::config::TimeoutConfig;
use crate::connectors::{Catalog, FormulaAnalyzer, PolicyEvaluator};
use crate::errors::with_timeout;

/// Component names recorded in `RiskAssessment::degraded_components`
pub const DEGRADED_CATALOG: &str = "catalog";
pub const DEGRADED_POLICY: &str = "policy";
pub const DEGRADED_FORMULA: &str = "formula";

#[derive(Clone)]
pub struct AssessmentPipeline {
    catalog: Arc<dyn Catalog>,
    policy: Arc<dyn PolicyEvaluator>,
    formula: Arc<dyn FormulaAnalyzer>,
    timeouts: TimeoutConfig,
}

impl AssessmentPipeline {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        policy: Arc<dyn PolicyEvaluator>,
        formula: Arc<dyn FormulaAnalyzer>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            catalog,
            policy,
            formula,
            timeouts,
        }
    }

    /// Score `change`; never fails
    pub async fn assess(&self, change: &Change, platform: Platform) -> RiskAssessment {
        let start = Instant::now();
        log_op_start!("risk_assessment", change_id = %change.id);

        let impact = async {
            match with_timeout(
                "list_components",
                self.timeouts.metadata(),
                self.catalog.list_components(&change.app_id),
            )
            .await
            {
                Ok(components) => (analyze_impact(&change.diff_result, &components), false),
                Err(err) => {
                    log_degraded!("impact_analysis", err, change_id = %change.id);
                    (analyze_impact(&change.diff_result, &[]), true)
                }
            }
        };

        let policy = async {
            match with_timeout(
                "policy_evaluate",
                self.timeouts.metadata(),
                self.policy.evaluate(change, &change.organization_id),
            )
            .await
            {
                Ok(result) => (result, false),
                Err(err) => {
                    log_degraded!("policy_evaluation", err, change_id = %change.id);
                    (PolicyResult::passed(), true)
                }
            }
        };

        let formula = async {
            if !change.has_code() {
                return (None, false);
            }
            let input = FormulaInput {
                before_code: change.before_code.as_deref().unwrap_or(""),
                after_code: change.after_code.as_deref().unwrap_or(""),
                dialect: platform.formula_dialect(),
            };
            match with_timeout(
                "formula_analyze",
                self.timeouts.metadata(),
                self.formula.analyze(input),
            )
            .await
            {
                Ok(result) => (Some(result), false),
                Err(err) => {
                    log_degraded!("formula_analysis", err, change_id = %change.id);
                    (None, true)
                }
            }
        };

        let ((impact, catalog_degraded), (policy, policy_degraded), (formula, formula_degraded)) =
            tokio::join!(impact, policy, formula);

        let mut inputs = RiskInputs::new(&impact, &policy).with_formula(formula.as_ref());
        for (degraded, name) in [
            (catalog_degraded, DEGRADED_CATALOG),
            (policy_degraded, DEGRADED_POLICY),
            (formula_degraded, DEGRADED_FORMULA),
        ] {
            if degraded {
                inputs = inputs.with_degraded(name);
            }
        }

        let assessment = score_risk(&inputs, Utc::now());
        log_op_end!(
            "risk_assessment",
            duration_ms = start.elapsed().as_millis() as u64,
            change_id = %change.id,
            risk_score = assessment.score,
            auto_block = assessment.auto_block
        );
        assessment
    }
}

impl std::fmt::Debug for AssessmentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssessmentPipeline")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
