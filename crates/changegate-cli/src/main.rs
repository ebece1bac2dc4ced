//! changegate CLI
//!
//! Offline diffing and scoring, database maintenance and sandbox lookups

use changegate_core::logging_facility::{init, Profile};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "changegate")]
#[command(about = "changegate - change risk scoring and sandbox lifecycle", long_about = None)]
struct Cli {
    /// Emit debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Diff two snapshot (or text) files
    Diff(commands::diff::DiffArgs),
    /// Diff, analyze and score two snapshot files
    Assess(commands::diff::AssessArgs),
    /// Database maintenance
    Db(commands::db::DbArgs),
    /// Inspect stored sandboxes
    Sandbox(commands::sandbox::SandboxArgs),
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        init(Profile::Development);
    }

    let result = match cli.command {
        Commands::Diff(args) => commands::diff::execute_diff(args),
        Commands::Assess(args) => commands::diff::execute_assess(args),
        Commands::Db(args) => commands::db::execute(args),
        Commands::Sandbox(args) => commands::sandbox::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
