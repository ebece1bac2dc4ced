//! Divergence between a sandbox branch and trunk

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// One file changed between two commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub kind: FileChangeKind,
    /// Previous location for renames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

impl FileDiff {
    pub fn new(path: impl Into<String>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            previous_path: None,
        }
    }

    fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str()).chain(self.previous_path.as_deref())
    }
}

/// Decides which paths changed on both sides of a divergence
pub trait ConflictDetector: Send + Sync {
    /// Conflicting paths, sorted and deduplicated; empty means no conflict
    fn conflicting_paths(&self, trunk: &[FileDiff], sandbox: &[FileDiff]) -> Vec<String>;
}

/// Conflict when both sides touched the same file, or one touched a
/// directory containing a file the other touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOverlapDetector;

impl ConflictDetector for PathOverlapDetector {
    fn conflicting_paths(&self, trunk: &[FileDiff], sandbox: &[FileDiff]) -> Vec<String> {
        let mut out = BTreeSet::new();
        for t in trunk {
            for s in sandbox {
                for tp in t.paths() {
                    for sp in s.paths() {
                        if paths_overlap(tp, sp) {
                            out.insert(sp.to_string());
                        }
                    }
                }
            }
        }
        out.into_iter().collect()
    }
}

fn paths_overlap(a: &str, b: &str) -> bool {
    let a = a.trim_matches('/');
    let b = b.trim_matches('/');
    a == b || is_within(a, b) || is_within(b, a)
}

fn is_within(path: &str, dir: &str) -> bool {
    !dir.is_empty()
        && path.len() > dir.len()
        && path.starts_with(dir)
        && path.as_bytes()[dir.len()] == b'/'
}
