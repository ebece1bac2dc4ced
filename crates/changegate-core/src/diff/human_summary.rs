//! Human-readable summary renderer for structured diffs.

use crate::diff::model::{DiffResult, ImpactLevel, OpKind};

/// Render a Markdown summary of a [`DiffResult`].
///
/// Intended for review displays. Informational only; the structured diff is
/// the source of truth.
pub fn render_human_summary(diff: &DiffResult) -> String {
    let mut out = String::new();

    out.push_str("## App Diff\n\n");

    if diff.is_empty() {
        out.push_str("_No changes detected._\n");
        return out;
    }

    out.push_str(&format!(
        "**Total changes**: {}  \n**Added**: {}  \n**Modified**: {}  \n**Deleted**: {}\n\n",
        diff.total_changes, diff.added, diff.modified, diff.deleted
    ));

    // Categories
    out.push_str("### Categories\n\n");
    out.push_str("| Category | Added | Modified | Deleted | Total |\n|---|---|---|---|---|\n");
    for (category, counts) in &diff.categories {
        out.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            category, counts.added, counts.modified, counts.deleted, counts.total
        ));
    }
    out.push('\n');

    // Notable operations, most severe first, document order within a level
    let mut notable: Vec<_> = diff
        .operations
        .iter()
        .filter(|op| op.impact_level.is_high_or_critical())
        .collect();
    notable.sort_by(|a, b| b.impact_level.cmp(&a.impact_level));
    if !notable.is_empty() {
        out.push_str("### Notable Changes\n\n");
        for op in notable {
            let marker = match op.impact_level {
                ImpactLevel::Critical => "⚠ ",
                _ => "",
            };
            let verb = match op.kind {
                OpKind::Add => "added",
                OpKind::Remove => "removed",
                OpKind::Replace => "modified",
            };
            out.push_str(&format!(
                "- {}**{}** `{}` {}\n",
                marker, op.impact_level, op.path, verb
            ));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::engine::compute_diff;
    use serde_json::json;

    #[test]
    fn test_summary_no_changes() {
        let doc = json!({"screens": []});
        let s = render_human_summary(&compute_diff(&doc, &doc));
        assert!(s.contains("_No changes detected._"));
    }

    #[test]
    fn test_summary_lists_categories_and_critical_ops() {
        let before = json!({"dataSources": [{"name": "CRM"}], "screens": [{"name": "Home"}]});
        let after = json!({"dataSources": [], "screens": [{"name": "Home"}, {"name": "New"}]});
        let s = render_human_summary(&compute_diff(&before, &after));
        assert!(s.contains("| `dataSources` | 0 | 0 | 1 | 1 |"));
        assert!(s.contains("| `screens` | 1 | 0 | 0 | 1 |"));
        assert!(s.contains("⚠ **critical** `/dataSources/0` removed"));
        assert!(!s.contains("/screens/1` added"));
    }
}
