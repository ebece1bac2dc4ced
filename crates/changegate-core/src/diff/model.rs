//! Structured diff output types.
//!
//! Categories are kept in a `BTreeMap` so serialized output is deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of a single patch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
        }
    }
}

/// Four-step severity scale shared by operations, impact and risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::Low => "low",
            ImpactLevel::Medium => "medium",
            ImpactLevel::High => "high",
            ImpactLevel::Critical => "critical",
        }
    }

    pub fn is_high_or_critical(&self) -> bool {
        *self >= ImpactLevel::High
    }
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One patch operation with its classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "op")]
    pub kind: OpKind,

    /// JSON Pointer (RFC 6901) to the changed location
    pub path: String,

    /// New value for `add` and `replace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Previous value for `remove` and `replace`, read from the before document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,

    /// First path segment (`root` for whole-document replacement)
    pub category: String,

    pub impact_level: ImpactLevel,
}

impl Operation {
    /// Decoded path segments
    pub fn segments(&self) -> Vec<String> {
        decode_pointer(&self.path)
    }

    /// Last decoded path segment, empty for the root
    pub fn last_segment(&self) -> String {
        self.segments().pop().unwrap_or_default()
    }
}

/// Per-category operation counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub total: usize,
}

/// Ordered operations plus aggregates
///
/// `total_changes == added + modified + deleted` always holds; the counts are
/// derived from `operations` by [`DiffResult::from_operations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub operations: Vec<Operation>,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub total_changes: usize,
    pub categories: BTreeMap<String, CategoryCounts>,
}

impl DiffResult {
    pub fn from_operations(operations: Vec<Operation>) -> Self {
        let mut added = 0;
        let mut modified = 0;
        let mut deleted = 0;
        let mut categories: BTreeMap<String, CategoryCounts> = BTreeMap::new();

        for op in &operations {
            let entry = categories.entry(op.category.clone()).or_default();
            match op.kind {
                OpKind::Add => {
                    added += 1;
                    entry.added += 1;
                }
                OpKind::Replace => {
                    modified += 1;
                    entry.modified += 1;
                }
                OpKind::Remove => {
                    deleted += 1;
                    entry.deleted += 1;
                }
            }
            entry.total += 1;
        }

        Self {
            operations,
            added,
            modified,
            deleted,
            total_changes: added + modified + deleted,
            categories,
        }
    }

    pub fn empty() -> Self {
        Self::from_operations(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations of one kind, in order
    pub fn operations_of(&self, kind: OpKind) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(move |op| op.kind == kind)
    }
}

impl Default for DiffResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Escape one reference token (`~` → `~0`, `/` → `~1`)
pub fn encode_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Split a JSON Pointer into unescaped reference tokens
pub fn decode_pointer(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(|raw| raw.replace("~1", "/").replace("~0", "~"))
        .collect()
}
