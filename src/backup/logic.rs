// backuptool/src/backup/logic.rs
use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, info_span, warn};

use crate::backup::archive::ArchiveBuilder;
use crate::backup::catalog::{CatalogEntry, CatalogStore};
use crate::backup::db_dump::{Connector, TableSource, dump_table};
use crate::backup::model::{BackupKind, BackupRequest, BackupRun, RunSummary, TableFailure};
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};

const RUN_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const DATABASE_DIR_NAME: &str = "database";

/// Where a run currently is. Used for structured log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Started,
    Database,
    Code,
    Cataloged,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Started => "started",
            RunPhase::Database => "database",
            RunPhase::Code => "code",
            RunPhase::Cataloged => "cataloged",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs backups one at a time and records each in the catalog.
pub struct BackupOrchestrator<C> {
    config: BackupConfig,
    connector: C,
    catalog: CatalogStore,
    archiver: ArchiveBuilder,
    run_lock: Mutex<()>,
}

impl<C: Connector> BackupOrchestrator<C> {
    pub fn new(config: BackupConfig, connector: C) -> Self {
        let catalog = CatalogStore::new(config.backup_root.clone());
        let archiver = ArchiveBuilder::new(config.exclude_dirs.iter().cloned())
            .with_skipped_dir(config.backup_root.clone());
        Self {
            config,
            connector,
            catalog,
            archiver,
            run_lock: Mutex::new(()),
        }
    }

    /// Lists recorded runs, newest first. The directory scan runs on the
    /// blocking pool.
    pub async fn list(&self) -> Result<Vec<CatalogEntry>> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.list())
            .await
            .map_err(|e| BackupError::Io(std::io::Error::other(format!("Catalog scan did not complete: {}", e))))?
    }

    /// Executes one backup run.
    ///
    /// Overlapping calls are serialized; each run gets its own directory.
    /// Per-table dump failures only shrink the manifest. A connection,
    /// archive or catalog failure fails the run, leaving whatever was
    /// already written on disk.
    pub async fn create(&self, request: BackupRequest) -> Result<RunSummary> {
        if !request.include_db && !request.include_code {
            return Err(BackupError::InvalidRequest(
                "Nothing to back up: enable include_db and/or include_code".to_string(),
            ));
        }

        let _guard = self.run_lock.lock().await;

        let created_at = Utc::now();
        let (run_id, run_dir) = allocate_run_dir(self.catalog.root(), created_at)?;
        let span = info_span!("backup_run", run_id = %run_id);

        async {
            let mut run = BackupRun::new(run_id, created_at, &request);
            info!(
                phase = %RunPhase::Started,
                path = %run_dir.display(),
                include_db = request.include_db,
                include_code = request.include_code,
                "🚀 Backup run started"
            );

            match self.execute(&mut run, &run_dir, &request).await {
                Ok(()) => {
                    info!(
                        phase = %RunPhase::Done,
                        files = run.file_manifest.len(),
                        failed_tables = run.failed_tables.len(),
                        "🎉 Backup run completed"
                    );
                    Ok(RunSummary {
                        backup_id: run.id,
                        completed_types: run.completed_types,
                        path: run_dir,
                        files: run.file_manifest,
                        failed_tables: run.failed_tables,
                    })
                }
                Err(e) => {
                    error!(phase = %RunPhase::Failed, error = %e, "❌ Backup run failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, run: &mut BackupRun, run_dir: &Path, request: &BackupRequest) -> Result<()> {
        if request.include_db {
            info!(phase = %RunPhase::Database, "Starting database backup");
            self.database_phase(run, run_dir).await?;
        }

        if request.include_code {
            info!(phase = %RunPhase::Code, "Starting code backup");
            self.code_phase(run, run_dir).await?;
        }

        let catalog = self.catalog.clone();
        let record = run.clone();
        tokio::task::spawn_blocking(move || catalog.record(&record))
            .await
            .map_err(|e| BackupError::CatalogWrite(format!("Catalog task did not complete: {}", e)))??;
        info!(phase = %RunPhase::Cataloged, "Catalog record written");
        Ok(())
    }

    async fn database_phase(&self, run: &mut BackupRun, run_dir: &Path) -> Result<()> {
        let mut source = self.connector.connect().await?;

        let db_dir = run_dir.join(DATABASE_DIR_NAME);
        let dumped = match tokio::fs::create_dir_all(&db_dir).await {
            Ok(()) => dump_all_tables(&mut source, &self.config.schemas, &db_dir, run).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = source.close().await {
            warn!(error = %e, "Failed to close database connection cleanly");
        }
        dumped?;

        run.mark_completed(BackupKind::Database);
        info!(
            files = run.file_manifest.len(),
            failed = run.failed_tables.len(),
            "✓ Database backup complete"
        );
        Ok(())
    }

    async fn code_phase(&self, run: &mut BackupRun, run_dir: &Path) -> Result<()> {
        let archive_path = run_dir.join(format!("source_{}.zip", run.id));
        let source_dir = self.config.source_dir.clone();
        let archiver = self.archiver.clone();

        let stats = tokio::task::spawn_blocking(move || archiver.build(&source_dir, &archive_path))
            .await
            .map_err(|e| BackupError::Archive(format!("Archive task did not complete: {}", e)))??;

        run.mark_completed(BackupKind::Code);
        info!(entries = stats.entries, "✓ Code backup complete");
        Ok(())
    }
}

/// Enumerates the configured schemas and dumps every table, in
/// schema/table order. Table failures are recorded on the run.
async fn dump_all_tables<S: TableSource>(
    source: &mut S,
    schemas: &[String],
    db_dir: &Path,
    run: &mut BackupRun,
) -> Result<()> {
    let mut tables = source.list_tables(schemas).await?;
    tables.sort();
    info!(tables = tables.len(), "Dumping tables");

    let mut total_rows = 0u64;
    for table in &tables {
        match dump_table(source, table, db_dir).await {
            Ok(dumped) => {
                total_rows += dumped.rows;
                run.file_manifest.push(dumped.file_name);
            }
            Err(e) => {
                let reason = match e {
                    BackupError::TableDump { reason, .. } => reason,
                    other => other.to_string(),
                };
                run.failed_tables.push(TableFailure {
                    table: table.to_string(),
                    reason,
                });
            }
        }
    }
    info!(rows = total_rows, "Rows written");
    Ok(())
}

/// Claims a fresh run directory named after `created_at` (local time).
/// A name already taken gets a `_1`, `_2`, ... suffix.
pub fn allocate_run_dir(root: &Path, created_at: DateTime<Utc>) -> Result<(String, PathBuf)> {
    fs::create_dir_all(root)?;
    let base = created_at.with_timezone(&Local).format(RUN_ID_FORMAT).to_string();

    let mut attempt = 0u32;
    loop {
        let id = if attempt == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let dir = root.join(&id);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((id, dir)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
