//! Structured diff computation.
//!
//! The entry point is [`compute_diff`], which walks two JSON documents and
//! emits a minimal ordered patch. Each operation is classified by category
//! and impact level as it is produced.

use crate::diff::model::{
    decode_pointer, encode_segment, DiffResult, ImpactLevel, OpKind, Operation,
};
use serde_json::{Map, Value};

/// Path keywords whose removal is critical and whose modification is high impact
pub const CRITICAL_KEYWORDS: &[&str] = &[
    "auth",
    "security",
    "permission",
    "role",
    "datasource",
    "connection",
    "api",
    "endpoint",
    "secret",
    "password",
    "token",
];

/// Category assigned to operations on the document root itself
pub const ROOT_CATEGORY: &str = "root";

/// Compute the structured diff between two documents.
///
/// `null` on either side is treated as an empty object. Operation order
/// follows the documents: for objects, keys of `before` in document order
/// (descending into shared keys, removing missing ones) then keys only in
/// `after`; for arrays, shared indices first, then removals from the highest
/// index down or additions from the lowest index up. Applying the operations
/// in order to `before` yields `after`.
pub fn compute_diff(before: &Value, after: &Value) -> DiffResult {
    let empty = Value::Object(Map::new());
    let before = if before.is_null() { &empty } else { before };
    let after = if after.is_null() { &empty } else { after };

    let mut raw = Vec::new();
    walk(before, after, "", &mut raw);

    let operations = raw
        .into_iter()
        .map(|r| classify(r, before))
        .collect::<Vec<_>>();
    DiffResult::from_operations(operations)
}

/// Operation before classification
struct RawOp {
    kind: OpKind,
    path: String,
    value: Option<Value>,
}

fn walk(before: &Value, after: &Value, path: &str, out: &mut Vec<RawOp>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = format!("{}/{}", path, encode_segment(key));
                match b.get(key) {
                    Some(new) => walk(old, new, &child, out),
                    None => out.push(RawOp {
                        kind: OpKind::Remove,
                        path: child,
                        value: None,
                    }),
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    out.push(RawOp {
                        kind: OpKind::Add,
                        path: format!("{}/{}", path, encode_segment(key)),
                        value: Some(new.clone()),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let shared = a.len().min(b.len());
            for i in 0..shared {
                walk(&a[i], &b[i], &format!("{}/{}", path, i), out);
            }
            for i in (shared..a.len()).rev() {
                out.push(RawOp {
                    kind: OpKind::Remove,
                    path: format!("{}/{}", path, i),
                    value: None,
                });
            }
            for (i, item) in b.iter().enumerate().skip(shared) {
                out.push(RawOp {
                    kind: OpKind::Add,
                    path: format!("{}/{}", path, i),
                    value: Some(item.clone()),
                });
            }
        }
        (old, new) => {
            if old != new {
                out.push(RawOp {
                    kind: OpKind::Replace,
                    path: path.to_string(),
                    value: Some(new.clone()),
                });
            }
        }
    }
}

fn classify(raw: RawOp, before: &Value) -> Operation {
    let old_value = match raw.kind {
        OpKind::Add => None,
        OpKind::Remove | OpKind::Replace => before.pointer(&raw.path).cloned(),
    };
    let category = decode_pointer(&raw.path)
        .into_iter()
        .next()
        .unwrap_or_else(|| ROOT_CATEGORY.to_string());
    let impact_level = impact_level_for(raw.kind, &raw.path);

    Operation {
        kind: raw.kind,
        path: raw.path,
        value: raw.value,
        old_value,
        category,
        impact_level,
    }
}

/// Impact level of an operation kind at a path
pub fn impact_level_for(kind: OpKind, path: &str) -> ImpactLevel {
    let critical_path = path_contains_any(path, CRITICAL_KEYWORDS);
    match kind {
        OpKind::Remove if critical_path => ImpactLevel::Critical,
        OpKind::Remove => ImpactLevel::High,
        OpKind::Add => ImpactLevel::Low,
        OpKind::Replace if critical_path => ImpactLevel::High,
        OpKind::Replace => ImpactLevel::Medium,
    }
}

/// Case-insensitive substring match of any keyword against a path
pub fn path_contains_any(path: &str, keywords: &[&str]) -> bool {
    let lowered = path.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}
