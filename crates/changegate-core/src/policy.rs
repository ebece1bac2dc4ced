//! Policy and formula analysis results
//!
//! Policy evaluation and formula analysis are performed by external
//! collaborators; this module defines the results they hand back to the
//! risk scorer.

use serde::{Deserialize, Serialize};

use crate::model::FormulaDialect;

/// Action a violated policy requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Change may not be promoted
    Block,
    RequireApproval,
    Notify,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub policy_id: String,
    pub action: PolicyAction,
}

impl RequiredAction {
    pub fn new(policy_id: impl Into<String>, action: PolicyAction) -> Self {
        Self {
            policy_id: policy_id.into(),
            action,
        }
    }
}

/// Outcome of evaluating organization policies against a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub passed: bool,
    pub violated_policy_ids: Vec<String>,
    pub required_actions: Vec<RequiredAction>,
}

impl PolicyResult {
    /// No policies violated
    pub fn passed() -> Self {
        Self {
            passed: true,
            violated_policy_ids: Vec::new(),
            required_actions: Vec::new(),
        }
    }

    /// Build a failing result from required actions; violated ids follow action order
    pub fn violated(required_actions: Vec<RequiredAction>) -> Self {
        let mut violated_policy_ids: Vec<String> = Vec::new();
        for action in &required_actions {
            if !violated_policy_ids.contains(&action.policy_id) {
                violated_policy_ids.push(action.policy_id.clone());
            }
        }
        Self {
            passed: violated_policy_ids.is_empty(),
            violated_policy_ids,
            required_actions,
        }
    }

    /// Policy ids whose required action is `Block`, deduplicated, in order
    pub fn blocking_policy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for action in &self.required_actions {
            if action.action == PolicyAction::Block && !ids.contains(&action.policy_id) {
                ids.push(action.policy_id.clone());
            }
        }
        ids
    }
}

/// Input handed to the formula analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaInput<'a> {
    pub before_code: &'a str,
    pub after_code: &'a str,
    pub dialect: FormulaDialect,
}

/// Complexity of changed formula code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaResult {
    /// 0 to 100
    pub complexity_score: u32,
    /// Count of risky constructs (dynamic evaluation, unbounded loops, ...)
    pub danger_signals: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_ids_only_from_block_actions() {
        let result = PolicyResult::violated(vec![
            RequiredAction::new("no-prod-delete", PolicyAction::Block),
            RequiredAction::new("four-eyes", PolicyAction::RequireApproval),
            RequiredAction::new("no-prod-delete", PolicyAction::Notify),
        ]);
        assert!(!result.passed);
        assert_eq!(result.violated_policy_ids, vec!["no-prod-delete", "four-eyes"]);
        assert_eq!(result.blocking_policy_ids(), vec!["no-prod-delete"]);
    }

    #[test]
    fn test_passed_has_no_blocks() {
        assert!(PolicyResult::passed().blocking_policy_ids().is_empty());
        assert!(PolicyResult::violated(Vec::new()).passed);
    }
}
