//! Line-based text diff.
//!
//! [`diff_lines`] aligns two texts by longest common subsequence; the three
//! renderers all work from that single aligned sequence.

use serde::{Deserialize, Serialize};

use crate::errors::{GateError, Result};

/// How an aligned line relates the two texts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineTag {
    #[serde(rename = " ")]
    Context,
    #[serde(rename = "+")]
    Added,
    #[serde(rename = "-")]
    Removed,
}

impl LineTag {
    pub fn marker(&self) -> char {
        match self {
            LineTag::Context => ' ',
            LineTag::Added => '+',
            LineTag::Removed => '-',
        }
    }
}

/// One aligned line with 1-based line numbers on each side it appears on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub tag: LineTag,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<usize>,
}

/// Output format for rendered text diffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    Json,
    Html,
    Text,
}

impl TextFormat {
    /// # Errors
    ///
    /// Returns `InvalidInput` for anything other than json, html or text.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Ok(TextFormat::Json),
            "html" => Ok(TextFormat::Html),
            "text" | "unified" => Ok(TextFormat::Text),
            other => Err(GateError::InvalidInput {
                field: "format".to_string(),
                reason: format!("unsupported diff format '{}'", other),
            }),
        }
    }
}

/// Most cells the alignment table may hold for the lines that differ
///
/// Common leading and trailing lines are matched directly and do not count.
pub const MAX_ALIGN_CELLS: usize = 4_000_000;

/// Align two texts line by line
///
/// # Errors
///
/// Returns `InvalidInput` when the differing middle sections are too large
/// to align within [`MAX_ALIGN_CELLS`].
pub fn diff_lines(before: &str, after: &str) -> Result<Vec<DiffLine>> {
    let a: Vec<&str> = before.lines().collect();
    let b: Vec<&str> = after.lines().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let cells = (mid_a.len() + 1).saturating_mul(mid_b.len() + 1);
    if cells > MAX_ALIGN_CELLS {
        return Err(GateError::InvalidInput {
            field: "text".to_string(),
            reason: format!(
                "{} removed and {} added lines are too many to align",
                mid_a.len(),
                mid_b.len()
            ),
        });
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    for (k, line) in a[..prefix].iter().enumerate() {
        out.push(context(line, k + 1, k + 1));
    }
    align(mid_a, mid_b, prefix, prefix, &mut out);
    let (tail_a, tail_b) = (a.len() - suffix, b.len() - suffix);
    for (k, line) in a[tail_a..].iter().enumerate() {
        out.push(context(line, tail_a + k + 1, tail_b + k + 1));
    }
    Ok(out)
}

fn context(text: &str, old_line: usize, new_line: usize) -> DiffLine {
    DiffLine {
        tag: LineTag::Context,
        text: text.to_string(),
        old_line: Some(old_line),
        new_line: Some(new_line),
    }
}

/// LCS alignment of `a` against `b`; line numbers start after the offsets
fn align(a: &[&str], b: &[&str], a_off: usize, b_off: usize, out: &mut Vec<DiffLine>) {
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            out.push(context(a[i], a_off + i + 1, b_off + j + 1));
            i += 1;
            j += 1;
        } else if i < n && (j == m || lcs[i + 1][j] >= lcs[i][j + 1]) {
            out.push(DiffLine {
                tag: LineTag::Removed,
                text: a[i].to_string(),
                old_line: Some(a_off + i + 1),
                new_line: None,
            });
            i += 1;
        } else {
            out.push(DiffLine {
                tag: LineTag::Added,
                text: b[j].to_string(),
                old_line: None,
                new_line: Some(b_off + j + 1),
            });
            j += 1;
        }
    }
}

/// Machine-readable list of aligned lines
///
/// # Errors
///
/// Returns `Serialization` if the lines cannot be encoded.
pub fn render_json(lines: &[DiffLine]) -> Result<String> {
    serde_json::to_string_pretty(lines).map_err(|e| GateError::Serialization {
        message: e.to_string(),
    })
}

/// HTML fragment with `<ins>`/`<del>` markup; line text is escaped
pub fn render_html(lines: &[DiffLine]) -> String {
    let mut out = String::from("<div class=\"diff\">\n");
    for line in lines {
        let text = escape_html(&line.text);
        let row = match line.tag {
            LineTag::Context => format!("  <div class=\"line context\">{}</div>\n", text),
            LineTag::Added => format!("  <div class=\"line added\"><ins>{}</ins></div>\n", text),
            LineTag::Removed => {
                format!("  <div class=\"line removed\"><del>{}</del></div>\n", text)
            }
        };
        out.push_str(&row);
    }
    out.push_str("</div>\n");
    out
}

/// Plain unified text: each line prefixed with `+`, `-` or a space
pub fn render_unified(lines: &[DiffLine]) -> String {
    let mut out = String::from("--- before\n+++ after\n");
    for line in lines {
        out.push(line.tag.marker());
        out.push_str(&line.text);
        out.push('\n');
    }
    out
}

/// Diff two texts and render in the requested format
///
/// # Errors
///
/// Returns `InvalidInput` if the texts are too far apart to align, or
/// `Serialization` if JSON rendering fails.
pub fn render_text_diff(before: &str, after: &str, format: TextFormat) -> Result<String> {
    let lines = diff_lines(before, after)?;
    match format {
        TextFormat::Json => render_json(&lines),
        TextFormat::Html => Ok(render_html(&lines)),
        TextFormat::Text => Ok(render_unified(&lines)),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_keeps_common_lines() {
        let lines = diff_lines("a\nb\nc", "a\nx\nc").unwrap();
        let tags: Vec<_> = lines.iter().map(|l| l.tag).collect();
        assert_eq!(
            tags,
            vec![
                LineTag::Context,
                LineTag::Removed,
                LineTag::Added,
                LineTag::Context
            ]
        );
        assert_eq!(lines[3].old_line, Some(3));
        assert_eq!(lines[3].new_line, Some(3));
    }

    #[test]
    fn test_html_escapes_markup() {
        let html = render_html(&diff_lines("", "<script>&").unwrap());
        assert!(html.contains("<ins>&lt;script&gt;&amp;</ins>"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_unified_prefixes() {
        let text = render_unified(&diff_lines("keep\nold", "keep\nnew").unwrap());
        assert!(text.contains("\n keep\n"));
        assert!(text.contains("\n-old\n"));
        assert!(text.contains("\n+new\n"));
    }

    #[test]
    fn test_json_uses_markers() {
        let json = render_json(&diff_lines("a", "b").unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["tag"], "-");
        assert_eq!(parsed[1]["tag"], "+");
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(TextFormat::parse("pdf").is_err());
        assert_eq!(TextFormat::parse("HTML").unwrap(), TextFormat::Html);
    }

    #[test]
    fn test_long_texts_with_one_edit_align_cheaply() {
        let before: Vec<String> = (0..20_000).map(|i| format!("line {}", i)).collect();
        let mut after = before.clone();
        after[10_000] = "edited".to_string();

        let lines = diff_lines(&before.join("\n"), &after.join("\n")).unwrap();
        assert_eq!(lines.len(), 20_001);
        let changed: Vec<_> = lines.iter().filter(|l| l.tag != LineTag::Context).collect();
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].old_line, Some(10_001));
        assert_eq!(changed[1].new_line, Some(10_001));
        let last = lines.last().unwrap();
        assert_eq!((last.old_line, last.new_line), (Some(20_000), Some(20_000)));
    }

    #[test]
    fn test_oversized_rewrite_is_rejected() {
        let before: Vec<String> = (0..2_500).map(|i| format!("old {}", i)).collect();
        let after: Vec<String> = (0..2_500).map(|i| format!("new {}", i)).collect();

        let err = render_text_diff(&before.join("\n"), &after.join("\n"), TextFormat::Text)
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidInput { ref field, .. } if field == "text"));
    }

    #[test]
    fn test_trailing_context_keeps_line_numbers() {
        let lines = diff_lines("a\nb\nz", "a\nc\nd\nz").unwrap();
        let last = lines.last().unwrap();
        assert_eq!(last.tag, LineTag::Context);
        assert_eq!((last.old_line, last.new_line), (Some(3), Some(4)));
    }
}
