//! Diff and assess commands
//!
//! Usage:
//!   changegate diff --before <FILE> --after <FILE> [--format json|html|text] [--text]
//!   changegate assess --before <FILE> --after <FILE> [--components <FILE>]

use changegate_core::diff::{compute_diff, render_human_summary, render_text_diff, TextFormat};
use changegate_core::impact::try_analyze;
use changegate_core::model::Component;
use changegate_core::policy::PolicyResult;
use changegate_core::risk::{score_risk, RiskInputs};
use clap::Args;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Snapshot (or text) before the change
    #[arg(long)]
    pub before: PathBuf,

    /// Snapshot (or text) after the change
    #[arg(long)]
    pub after: PathBuf,

    /// json: structured diff, text: review summary, html: aligned markup
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Treat both files as plain text and align them line by line
    #[arg(long)]
    pub text: bool,
}

#[derive(Debug, Args)]
pub struct AssessArgs {
    #[arg(long)]
    pub before: PathBuf,

    #[arg(long)]
    pub after: PathBuf,

    /// JSON array of app components for dependency analysis
    #[arg(long)]
    pub components: Option<PathBuf>,
}

pub fn execute_diff(args: DiffArgs) -> Result<(), Box<dyn std::error::Error>> {
    let format = TextFormat::parse(&args.format)?;

    if args.text {
        let before = std::fs::read_to_string(&args.before)?;
        let after = std::fs::read_to_string(&args.after)?;
        print!("{}", render_text_diff(&before, &after, format)?);
        return Ok(());
    }

    let before = read_document(&args.before)?;
    let after = read_document(&args.after)?;
    let diff = compute_diff(&before, &after);
    match format {
        TextFormat::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
        TextFormat::Text => print!("{}", render_human_summary(&diff)),
        TextFormat::Html => {
            let rendered = render_text_diff(
                &serde_json::to_string_pretty(&before)?,
                &serde_json::to_string_pretty(&after)?,
                TextFormat::Html,
            )?;
            print!("{}", rendered);
        }
    }
    Ok(())
}

/// Score offline: no policy service is consulted, so policy always passes
pub fn execute_assess(args: AssessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let before = read_document(&args.before)?;
    let after = read_document(&args.after)?;
    let components: Vec<Component> = match &args.components {
        Some(path) => serde_json::from_value(read_document(path)?)?,
        None => Vec::new(),
    };

    let diff = compute_diff(&before, &after);
    let impact = try_analyze(&diff, &components)?;
    let policy = PolicyResult::passed();
    let assessment = score_risk(&RiskInputs::new(&impact, &policy), chrono::Utc::now());

    let report = json!({
        "total_changes": diff.total_changes,
        "added": diff.added,
        "modified": diff.modified,
        "deleted": diff.deleted,
        "impact": impact,
        "assessment": assessment,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_document(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))?;
    Ok(value)
}
