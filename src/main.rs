//! Backup service
//!
//! Dumps database tables to JSON Lines, archives the source tree and keeps
//! a catalog of runs. Runs as an HTTP service or from the command line.

// backuptool/src/main.rs
mod backup;
mod config;
mod errors;
mod server;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use backup::model::BackupRequest;
use utils::logging::{LogFormat, init_logging};

#[derive(Debug, Parser)]
#[command(name = "backuptool", about = "Database and source code backups")]
struct Cli {
    /// Optional JSON config file; environment variables take precedence.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the backup HTTP API (default)
    Serve,
    /// Take one backup and exit
    Create {
        /// Skip the database dump
        #[arg(long)]
        no_db: bool,
        /// Skip the source archive
        #[arg(long)]
        no_code: bool,
        /// Free-form note stored with the run
        #[arg(long, default_value = "")]
        note: String,
    },
    /// List recorded backups, newest first
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let format = LogFormat::from_env().unwrap_or_default();
    if let Err(e) = init_logging(format) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(
                backup_root = %app_config.backup.backup_root.display(),
                source_dir = %app_config.backup.source_dir.display(),
                "Starting backup service"
            );
            let orchestrator = Arc::new(backup::build_orchestrator(&app_config));
            server::serve(orchestrator, app_config.bind_addr).await?;
        }
        Command::Create {
            no_db,
            no_code,
            note,
        } => {
            let request = BackupRequest {
                include_db: !no_db,
                include_code: !no_code,
                note,
            };
            let summary = backup::run_backup_flow(&app_config, request).await?;
            info!(
                backup_id = %summary.backup_id,
                path = %summary.path.display(),
                files = summary.files.len(),
                failed_tables = summary.failed_tables.len(),
                "✅ Backup created"
            );
            for failure in &summary.failed_tables {
                info!(table = %failure.table, reason = %failure.reason, "Table was not backed up");
            }
        }
        Command::List => {
            let orchestrator = backup::build_orchestrator(&app_config);
            let entries = orchestrator.list().await.context("Failed to read backup catalog")?;
            if entries.is_empty() {
                info!("No backups recorded");
            }
            for entry in entries {
                info!(
                    id = %entry.run.id,
                    created_at = %entry.run.created_at,
                    kind = %entry.run.type_label(),
                    size = %utils::format_size_mb(entry.size_bytes),
                    note = %entry.run.note,
                    "Backup"
                );
            }
        }
    }
    Ok(())
}
