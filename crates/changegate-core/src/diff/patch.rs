//! Apply diff operations to a document.
//!
//! Used to replay a stored diff and to check that a diff reproduces its
//! after document.

use crate::diff::model::{decode_pointer, OpKind, Operation};
use crate::errors::{GateError, Result};
use serde_json::Value;

/// Apply operations in order to a copy of `doc`
///
/// # Errors
///
/// Returns `InvalidInput` when an operation does not fit the document.
pub fn apply_operations(doc: &Value, ops: &[Operation]) -> Result<Value> {
    let mut out = doc.clone();
    for op in ops {
        let value = op.value.clone().unwrap_or(Value::Null);
        match op.kind {
            OpKind::Add => add(&mut out, &op.path, value)?,
            OpKind::Replace => replace(&mut out, &op.path, value)?,
            OpKind::Remove => remove(&mut out, &op.path)?,
        }
    }
    Ok(out)
}

fn patch_error(path: &str, reason: impl Into<String>) -> GateError {
    GateError::InvalidInput {
        field: format!("patch path {:?}", path),
        reason: reason.into(),
    }
}

fn parent_mut<'a>(doc: &'a mut Value, path: &str) -> Result<(&'a mut Value, String)> {
    let tokens = decode_pointer(path);
    let (last, parents) = tokens
        .split_last()
        .ok_or_else(|| patch_error(path, "operation needs a non-root path"))?;

    let mut cur = doc;
    for tok in parents {
        cur = match cur {
            Value::Object(m) => m
                .get_mut(tok)
                .ok_or_else(|| patch_error(path, "path not found"))?,
            Value::Array(a) => {
                let idx = parse_index(path, tok)?;
                a.get_mut(idx)
                    .ok_or_else(|| patch_error(path, "array index out of bounds"))?
            }
            _ => return Err(patch_error(path, "cannot traverse into a scalar")),
        };
    }
    Ok((cur, last.clone()))
}

fn parse_index(path: &str, tok: &str) -> Result<usize> {
    tok.parse::<usize>()
        .map_err(|_| patch_error(path, format!("expected array index, got {:?}", tok)))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, last) = parent_mut(doc, path)?;
    match parent {
        Value::Object(m) => {
            m.insert(last, value);
            Ok(())
        }
        Value::Array(a) => {
            if last == "-" {
                a.push(value);
                return Ok(());
            }
            let idx = parse_index(path, &last)?;
            if idx > a.len() {
                return Err(patch_error(path, "array index out of bounds"));
            }
            a.insert(idx, value);
            Ok(())
        }
        _ => Err(patch_error(path, "parent is not a container")),
    }
}

fn replace(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, last) = parent_mut(doc, path)?;
    let slot = match parent {
        Value::Object(m) => m.get_mut(&last),
        Value::Array(a) => {
            let idx = parse_index(path, &last)?;
            a.get_mut(idx)
        }
        _ => None,
    };
    let slot = slot.ok_or_else(|| patch_error(path, "replace target not found"))?;
    *slot = value;
    Ok(())
}

fn remove(doc: &mut Value, path: &str) -> Result<()> {
    let (parent, last) = parent_mut(doc, path)?;
    match parent {
        Value::Object(m) => m
            .remove(&last)
            .map(|_| ())
            .ok_or_else(|| patch_error(path, "remove target not found")),
        Value::Array(a) => {
            let idx = parse_index(path, &last)?;
            if idx >= a.len() {
                return Err(patch_error(path, "array index out of bounds"));
            }
            a.remove(idx);
            Ok(())
        }
        _ => Err(patch_error(path, "parent is not a container")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::engine::compute_diff;
    use serde_json::json;

    #[test]
    fn test_replaying_diff_reproduces_after() {
        let before = json!({
            "screens": [{"name": "Home"}, {"name": "Admin"}, {"name": "Old"}],
            "settings": {"theme": "dark", "locale": "en"}
        });
        let after = json!({
            "screens": [{"name": "Home", "visible": true}],
            "settings": {"theme": "light"},
            "flows": ["onStart"]
        });
        let diff = compute_diff(&before, &after);
        assert_eq!(apply_operations(&before, &diff.operations).unwrap(), after);
    }

    #[test]
    fn test_remove_missing_path_fails() {
        let diff = compute_diff(&json!({"a": 1}), &json!({}));
        assert!(apply_operations(&json!({}), &diff.operations).is_err());
    }
}
