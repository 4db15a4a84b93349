pub mod archive;
pub mod catalog;
pub mod db_dump;
pub mod logic;
pub mod model;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use db_dump::PgConnector;
use logic::BackupOrchestrator;
use model::{BackupRequest, RunSummary};

/// Production orchestrator: one Postgres connection per run.
pub type PgOrchestrator = BackupOrchestrator<PgConnector>;

pub fn build_orchestrator(app_config: &AppConfig) -> PgOrchestrator {
    let connector = PgConnector::new(app_config.backup.database_url.clone());
    BackupOrchestrator::new(app_config.backup.clone(), connector)
}

/// Public entry point for a single backup run from the command line.
pub async fn run_backup_flow(app_config: &AppConfig, request: BackupRequest) -> Result<RunSummary> {
    build_orchestrator(app_config)
        .create(request)
        .await
        .context("Backup run failed")
}
