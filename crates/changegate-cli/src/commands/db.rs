//! Database commands
//!
//! Usage: changegate db migrate [--db <FILE>]

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommand,
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Create or upgrade the schema
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[arg(long, default_value = ".changegate/store.db")]
    pub db: PathBuf,
}

pub fn execute(args: DbArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        DbCommand::Migrate(migrate_args) => execute_migrate(migrate_args),
    }
}

fn execute_migrate(args: MigrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = args.db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = changegate_store::db::open(&args.db)?;
    changegate_store::db::configure(&conn)?;

    let before = changegate_store::migrations::applied_migrations(&conn)?;
    changegate_store::migrations::apply_migrations(&mut conn)?;
    let after = changegate_store::migrations::applied_migrations(&conn)?;

    let fresh: Vec<_> = after.iter().filter(|id| !before.contains(id)).collect();
    if fresh.is_empty() {
        println!("Schema up to date ({} migrations)", after.len());
    } else {
        for id in fresh {
            println!("Applied {}", id);
        }
    }
    Ok(())
}
