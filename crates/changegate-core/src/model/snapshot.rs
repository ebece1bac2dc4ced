use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::{GateError, Result};

/// Snapshot - the full exported definition of an app at one point in time
///
/// The document is treated as an opaque JSON tree. A `null` document is
/// normalized to an empty object so that diffing against "nothing" works
/// without special cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Platform revision the snapshot was exported at, if known
    pub revision: Option<String>,

    /// When the snapshot was captured
    pub captured_at: DateTime<Utc>,

    /// The app definition
    pub document: Value,
}

impl Snapshot {
    /// Capture a snapshot of the given document
    pub fn new(document: Value) -> Self {
        Self {
            revision: None,
            captured_at: Utc::now(),
            document: normalize(document),
        }
    }

    /// An empty snapshot (`{}`)
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    /// Attach the platform revision this snapshot was exported at
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Parse a snapshot from JSON text. Blank text is an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSnapshot` when the text is not valid JSON.
    pub fn from_json_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        let document: Value =
            serde_json::from_str(text).map_err(|e| GateError::InvalidSnapshot {
                reason: e.to_string(),
            })?;
        Ok(Self::new(document))
    }

    /// True when the document has no content
    pub fn is_empty(&self) -> bool {
        match &self.document {
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    /// SHA-256 over the canonical JSON form (keys sorted at every level)
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&self.document).as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn normalize(document: Value) -> Value {
    match document {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

/// Serialize a value with object keys sorted, independent of insertion order
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
