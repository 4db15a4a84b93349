// backuptool/src/backup/archive.rs
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{BackupError, Result};

/// Directory names left out of source archives unless configured otherwise.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["node_modules", ".next", ".git", "logs", "tmp", ".gemini"];

/// Writes a deflate-compressed zip of a source tree, pruning excluded
/// directory names at any depth.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    excluded: BTreeSet<String>,
    skipped_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: usize,
}

impl ArchiveBuilder {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
            skipped_dirs: Vec::new(),
        }
    }

    /// Leaves `dir` out of the archive when it lies inside the source tree,
    /// e.g. a backup root kept under the project directory.
    pub fn with_skipped_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.skipped_dirs.push(dir.into());
        self
    }

    /// True for directories below the root whose name is excluded, or whose
    /// path relative to the source is one of `skipped`.
    fn is_pruned(&self, entry: &DirEntry, source_dir: &Path, skipped: &[PathBuf]) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let excluded_name = entry
            .file_name()
            .to_str()
            .is_some_and(|name| self.excluded.contains(name));
        excluded_name
            || entry
                .path()
                .strip_prefix(source_dir)
                .is_ok_and(|relative| skipped.iter().any(|s| s == relative))
    }

    /// Skipped directories that sit inside `source_dir`, relative to it.
    fn skipped_within(&self, source_dir: &Path) -> Vec<PathBuf> {
        let Ok(source_real) = fs::canonicalize(source_dir) else {
            return Vec::new();
        };
        self.skipped_dirs
            .iter()
            .filter_map(|dir| fs::canonicalize(dir).ok())
            .filter_map(|dir| dir.strip_prefix(&source_real).ok().map(Path::to_path_buf))
            .filter(|relative| !relative.as_os_str().is_empty())
            .collect()
    }

    /// Archives every regular file under `source_dir` into `archive_path`.
    ///
    /// Any failure is returned as `BackupError::Archive`; a partially written
    /// archive must not be reported as complete.
    pub fn build(&self, source_dir: &Path, archive_path: &Path) -> Result<ArchiveStats> {
        if !source_dir.is_dir() {
            return Err(BackupError::Archive(format!(
                "Source for archival is not a directory: {}",
                source_dir.display()
            )));
        }

        info!(
            source = %source_dir.display(),
            archive = %archive_path.display(),
            "Creating source archive"
        );

        let archive_file = File::create(archive_path).map_err(|e| {
            archive_error(format!("Failed to create archive file {}", archive_path.display()), e)
        })?;
        let archive_real = fs::canonicalize(archive_path).ok();
        let mut zip = ZipWriter::new(BufWriter::new(archive_file));
        let mut entries = 0usize;

        let skipped = self.skipped_within(source_dir);
        for relative in &skipped {
            debug!(dir = %relative.display(), "Skipping directory inside source tree");
        }

        let walker = WalkDir::new(source_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_pruned(entry, source_dir, &skipped));

        for entry in walker {
            let entry = entry.map_err(|e| {
                archive_error(format!("Failed to walk directory {}", source_dir.display()), e)
            })?;
            let path = entry.path();

            let is_file = entry.file_type().is_file()
                || (entry.file_type().is_symlink() && path.is_file());
            if !is_file {
                continue;
            }
            if archive_real.is_some()
                && Some(entry.file_name()) == archive_path.file_name()
                && fs::canonicalize(path).ok() == archive_real
            {
                continue;
            }

            let relative = path.strip_prefix(source_dir).map_err(|e| {
                archive_error(format!("Failed to relativize {}", path.display()), e)
            })?;
            let name = entry_name(relative);

            let mut file = File::open(path)
                .map_err(|e| archive_error(format!("Failed to open {}", path.display()), e))?;
            let size = file.metadata().map(|m| m.len()).unwrap_or(0);
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u64::from(u32::MAX));

            zip.start_file(name.as_str(), options)
                .map_err(|e| archive_error(format!("Failed to add entry {}", name), e))?;
            io::copy(&mut file, &mut zip)
                .map_err(|e| archive_error(format!("Failed to write entry {}", name), e))?;

            debug!(entry = %name, bytes = size, "Archived file");
            entries += 1;
        }

        let mut writer = zip.finish().map_err(|e| {
            archive_error(format!("Failed to finish archive {}", archive_path.display()), e)
        })?;
        io::Write::flush(&mut writer).map_err(|e| {
            archive_error(format!("Failed to flush archive {}", archive_path.display()), e)
        })?;

        info!(archive = %archive_path.display(), entries, "✓ Source archive created");
        Ok(ArchiveStats { entries })
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_DIRS.iter().copied())
    }
}

/// Forward-slash entry name regardless of host separator.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn archive_error(context: String, err: impl std::fmt::Display) -> BackupError {
    BackupError::Archive(format!("{}: {}", context, err))
}
