//! Sandbox inspection commands
//!
//! Usage:
//!   changegate sandbox list --org <ORG> [--status <STATUS>]... [--app <APP>] [--db <FILE>]
//!   changegate sandbox show <SANDBOX_ID> [--db <FILE>]

use changegate_core::model::SandboxStatus;
use changegate_engine::{apply_engine_query, EngineQuery, EngineQueryResult};
use changegate_store::SandboxFilter;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct SandboxArgs {
    #[command(subcommand)]
    pub command: SandboxCommand,
}

#[derive(Debug, Subcommand)]
pub enum SandboxCommand {
    /// One line per sandbox in an organization
    List(ListArgs),
    /// Full sandbox record as JSON
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub org: String,

    /// Repeatable; e.g. ACTIVE, PENDING_REVIEW
    #[arg(long)]
    pub status: Vec<String>,

    #[arg(long)]
    pub app: Option<String>,

    #[arg(long, default_value = ".changegate/store.db")]
    pub db: PathBuf,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub sandbox_id: String,

    #[arg(long, default_value = ".changegate/store.db")]
    pub db: PathBuf,
}

pub fn execute(args: SandboxArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        SandboxCommand::List(list_args) => execute_list(list_args),
        SandboxCommand::Show(show_args) => execute_show(show_args),
    }
}

fn execute_list(args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_existing(&args.db)?;
    let statuses = args
        .status
        .iter()
        .map(|s| SandboxStatus::parse(&s.to_ascii_uppercase()))
        .collect::<Result<Vec<_>, _>>()?;
    let filter = SandboxFilter {
        organization_id: Some(args.org),
        statuses,
        app_id: args.app,
        ..SandboxFilter::default()
    };

    let EngineQueryResult::Sandboxes(sandboxes) =
        apply_engine_query(EngineQuery::SandboxList(filter), &conn)?
    else {
        return Err("unexpected query result".into());
    };

    if sandboxes.is_empty() {
        println!("No sandboxes");
        return Ok(());
    }
    for sb in sandboxes {
        println!(
            "{}\t{}\t{}\t{}\texpires {}",
            sb.id,
            sb.status(),
            sb.sandbox_type,
            sb.name,
            sb.expires_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn execute_show(args: ShowArgs) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_existing(&args.db)?;
    let EngineQueryResult::Sandbox(sandbox) = apply_engine_query(
        EngineQuery::SandboxGet {
            sandbox_id: args.sandbox_id,
        },
        &conn,
    )?
    else {
        return Err("unexpected query result".into());
    };
    println!("{}", serde_json::to_string_pretty(&sandbox)?);
    Ok(())
}

/// Reads never create a database
fn open_existing(path: &Path) -> Result<rusqlite::Connection, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!(
            "no database at {}; run `changegate db migrate` first",
            path.display()
        )
        .into());
    }
    Ok(changegate_store::db::open(path)?)
}
