// backuptool/src/backup/catalog.rs
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backup::model::BackupRun;
use crate::errors::{BackupError, Result};

pub const META_FILE_NAME: &str = "meta.json";

/// A persisted run plus its on-disk size, computed at listing time.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub run: BackupRun,
    pub size_bytes: u64,
}

/// One `meta.json` per run directory under `root`.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
}

impl CatalogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Persists the run's metadata. Written to a temporary file first and
    /// renamed, so readers never see a half-written record.
    pub fn record(&self, run: &BackupRun) -> Result<PathBuf> {
        let run_dir = self.run_dir(&run.id);
        let meta_path = run_dir.join(META_FILE_NAME);
        let tmp_path = run_dir.join(format!("{}.tmp", META_FILE_NAME));

        let write = || -> std::result::Result<(), Box<dyn std::error::Error>> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, run)?;
            writer.flush()?;
            fs::rename(&tmp_path, &meta_path)?;
            Ok(())
        };
        write().map_err(|e| {
            BackupError::CatalogWrite(format!("{}: {}", meta_path.display(), e))
        })?;

        debug!(run_id = %run.id, path = %meta_path.display(), "Catalog record written");
        Ok(meta_path)
    }

    /// Every recorded run, newest first. A missing root is an empty catalog.
    pub fn list(&self) -> Result<Vec<CatalogEntry>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let run_dir = dir_entry.path();
            let meta_path = run_dir.join(META_FILE_NAME);
            if !meta_path.is_file() {
                continue;
            }

            let run = match read_run(&meta_path) {
                Ok(run) => run,
                Err(e) => {
                    warn!(path = %meta_path.display(), error = %e, "Skipping unreadable catalog record");
                    continue;
                }
            };
            entries.push(CatalogEntry {
                run,
                size_bytes: dir_size(&run_dir),
            });
        }

        entries.sort_by(|a, b| {
            b.run
                .created_at
                .cmp(&a.run.created_at)
                .then_with(|| b.run.id.cmp(&a.run.id))
        });
        Ok(entries)
    }
}

fn read_run(meta_path: &Path) -> Result<BackupRun> {
    let content = fs::read_to_string(meta_path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Sum of regular file sizes under `dir`, recursively.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::model::{BackupKind, BackupRequest};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn run_at(id: &str, minutes: i64) -> BackupRun {
        let request = BackupRequest {
            include_code: false,
            include_db: true,
            note: format!("run {}", id),
        };
        let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        let mut run = BackupRun::new(id.to_string(), created_at, &request);
        run.mark_completed(BackupKind::Database);
        run
    }

    fn store_run(store: &CatalogStore, run: &BackupRun) -> anyhow::Result<()> {
        fs::create_dir_all(store.run_dir(&run.id))?;
        store.record(run)?;
        Ok(())
    }

    #[test]
    fn missing_root_lists_empty() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let store = CatalogStore::new(base.path().join("never-created"));
        assert!(store.list()?.is_empty());
        Ok(())
    }

    #[test]
    fn empty_root_lists_empty() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        assert!(CatalogStore::new(base.path()).list()?.is_empty());
        Ok(())
    }

    #[test]
    fn lists_newest_first() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let store = CatalogStore::new(base.path());
        for (id, minutes) in [("b", 5), ("a", 10), ("c", 1)] {
            store_run(&store, &run_at(id, minutes))?;
        }

        let ids: Vec<String> = store.list()?.into_iter().map(|e| e.run.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn skips_directories_without_valid_metadata() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let store = CatalogStore::new(base.path());
        store_run(&store, &run_at("kept", 0))?;
        fs::create_dir_all(base.path().join("in-progress/database"))?;
        fs::create_dir_all(base.path().join("corrupt"))?;
        fs::write(base.path().join("corrupt").join(META_FILE_NAME), "{not json")?;
        fs::write(base.path().join("stray.txt"), "x")?;

        let entries = store.list()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run.id, "kept");
        Ok(())
    }

    #[test]
    fn size_covers_nested_files() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let store = CatalogStore::new(base.path());
        let run = run_at("sized", 0);
        store_run(&store, &run)?;
        let run_dir = store.run_dir(&run.id);
        fs::create_dir_all(run_dir.join("database"))?;
        fs::write(run_dir.join("database").join("public_a.jsonl"), vec![b'x'; 1000])?;
        fs::write(run_dir.join("source.zip"), vec![b'y'; 24])?;

        let meta_len = fs::metadata(run_dir.join(META_FILE_NAME))?.len();
        let entries = store.list()?;
        assert_eq!(entries[0].size_bytes, 1024 + meta_len);
        Ok(())
    }

    #[test]
    fn record_round_trips_and_leaves_no_temp_file() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let store = CatalogStore::new(base.path());
        let mut run = run_at("rt", 0);
        run.file_manifest = vec!["public_a.jsonl".into(), "public_b.jsonl".into()];
        store_run(&store, &run)?;

        let run_dir = store.run_dir("rt");
        assert!(!run_dir.join("meta.json.tmp").exists());
        assert_eq!(store.list()?[0].run, run);
        Ok(())
    }

    #[test]
    fn record_into_missing_directory_is_catalog_write_error() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let store = CatalogStore::new(base.path());
        let result = store.record(&run_at("ghost", 0));
        assert!(matches!(result, Err(BackupError::CatalogWrite(_))));
        Ok(())
    }
}
