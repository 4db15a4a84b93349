// backuptool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::backup::archive::DEFAULT_EXCLUDED_DIRS;
use crate::backup::db_dump::redact_database_url;
use crate::errors::BackupError;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_SOURCE_DIR: &str = "BACKUP_SOURCE_DIR";
pub const ENV_BACKUP_ROOT: &str = "BACKUP_ROOT";
pub const ENV_SCHEMAS: &str = "BACKUP_SCHEMAS";
pub const ENV_EXCLUDE_DIRS: &str = "BACKUP_EXCLUDE_DIRS";
pub const ENV_BIND_ADDR: &str = "BACKUP_BIND_ADDR";

pub const DEFAULT_SCHEMAS: &[&str] = &[
    "public",
    "schema_core",
    "schema_medical",
    "schema_lab",
    "schema_logistics",
    "auth",
];
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

// Mirrors config.json; every field optional until validated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub database_url: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
    pub schemas: Option<Vec<String>>,
    pub exclude_dirs: Option<Vec<String>>,
    pub bind_addr: Option<String>,
}

impl RawConfig {
    pub fn from_json_file(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })
    }

    /// Environment values win over whatever the JSON file said.
    pub fn overlay_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }
        if let Some(dir) = lookup(ENV_SOURCE_DIR) {
            self.source_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup(ENV_BACKUP_ROOT) {
            self.backup_root = Some(PathBuf::from(dir));
        }
        if let Some(list) = lookup(ENV_SCHEMAS) {
            self.schemas = Some(parse_list(&list));
        }
        if let Some(list) = lookup(ENV_EXCLUDE_DIRS) {
            self.exclude_dirs = Some(parse_list(&list));
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = Some(addr);
        }
        self
    }
}

/// Everything one backup run needs. Injected into the orchestrator.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub database_url: Option<String>,
    pub source_dir: PathBuf,
    pub backup_root: PathBuf,
    pub schemas: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    /// Loads `.env`, the optional JSON file, and the process environment.
    pub fn load(config_path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let raw = if config_path.is_file() {
            RawConfig::from_json_file(config_path)?
        } else {
            RawConfig::default()
        };
        let raw = raw.overlay_env(|key| std::env::var(key).ok());

        Ok(Self::from_raw(raw)?)
    }

    pub fn from_raw(raw: RawConfig) -> std::result::Result<Self, BackupError> {
        let database_url = raw
            .database_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &database_url {
            redact_database_url(url)?;
        }

        let source_dir = required_path(raw.source_dir, "source_dir", ENV_SOURCE_DIR)?;
        let backup_root = required_path(raw.backup_root, "backup_root", ENV_BACKUP_ROOT)?;

        let schemas = clean_list(raw.schemas).unwrap_or_else(|| to_owned_list(DEFAULT_SCHEMAS));
        if schemas.is_empty() {
            return Err(BackupError::Configuration(
                "At least one schema must be configured for database backups".to_string(),
            ));
        }
        let exclude_dirs =
            clean_list(raw.exclude_dirs).unwrap_or_else(|| to_owned_list(DEFAULT_EXCLUDED_DIRS));

        let bind_addr_str = raw.bind_addr.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_str.trim().parse::<SocketAddr>().map_err(|e| {
            BackupError::Configuration(format!("Invalid bind address {}: {}", bind_addr_str, e))
        })?;

        Ok(AppConfig {
            backup: BackupConfig {
                database_url,
                source_dir,
                backup_root,
                schemas,
                exclude_dirs,
            },
            bind_addr,
        })
    }
}

fn required_path(
    value: Option<PathBuf>,
    json_key: &str,
    env_key: &str,
) -> std::result::Result<PathBuf, BackupError> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => Err(BackupError::Configuration(format!(
            "{} must be set in config.json or via {}",
            json_key, env_key
        ))),
    }
}

/// Splits a comma separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean_list(list: Option<Vec<String>>) -> Option<Vec<String>> {
    list.map(|items| {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
