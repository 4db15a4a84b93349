// backuptool/src/backup/model.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A schema-qualified relation that can be dumped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"` with embedded quotes doubled.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Name of the JSON Lines file this table is dumped into.
    pub fn dump_file_name(&self) -> String {
        format!(
            "{}_{}.jsonl",
            sanitize_file_part(&self.schema),
            sanitize_file_part(&self.table)
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sanitize_file_part(part: &str) -> String {
    part.replace(['/', '\\'], "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    #[serde(rename = "DB")]
    Database,
    #[serde(rename = "CODE")]
    Code,
}

impl BackupKind {
    pub fn label(self) -> &'static str {
        match self {
            BackupKind::Database => "DB",
            BackupKind::Code => "CODE",
        }
    }
}

/// What a caller asks for.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupRequest {
    #[serde(default = "default_true")]
    pub include_code: bool,
    #[serde(default = "default_true")]
    pub include_db: bool,
    #[serde(default)]
    pub note: String,
}

fn default_true() -> bool {
    true
}

impl BackupRequest {
    pub fn requested_kinds(&self) -> Vec<BackupKind> {
        let mut kinds = Vec::new();
        if self.include_db {
            kinds.push(BackupKind::Database);
        }
        if self.include_code {
            kinds.push(BackupKind::Code);
        }
        kinds
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    pub reason: String,
}

/// One backup run. Persisted as `meta.json` inside the run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub requested: Vec<BackupKind>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub completed_types: Vec<BackupKind>,
    #[serde(rename = "files", default)]
    pub file_manifest: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tables: Vec<TableFailure>,
}

impl BackupRun {
    pub fn new(id: String, created_at: DateTime<Utc>, request: &BackupRequest) -> Self {
        Self {
            id,
            created_at,
            requested: request.requested_kinds(),
            note: request.note.clone(),
            completed_types: Vec::new(),
            file_manifest: Vec::new(),
            failed_tables: Vec::new(),
        }
    }

    pub fn mark_completed(&mut self, kind: BackupKind) {
        if !self.completed_types.contains(&kind) {
            self.completed_types.push(kind);
        }
    }

    /// `"DB + CODE"` style label used by the dashboard.
    pub fn type_label(&self) -> String {
        self.completed_types
            .iter()
            .map(|k| k.label())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// Result of a successful (or partially successful) run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub backup_id: String,
    pub completed_types: Vec<BackupKind>,
    pub path: PathBuf,
    pub files: Vec<String>,
    pub failed_tables: Vec<TableFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_refs_order_by_schema_then_table() {
        let mut tables = vec![
            TableRef::new("schema_b", "a"),
            TableRef::new("schema_a", "t2"),
            TableRef::new("schema_a", "t1"),
        ];
        tables.sort();
        let names: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["schema_a.t1", "schema_a.t2", "schema_b.a"]);
    }

    #[test]
    fn quoted_escapes_embedded_quotes() {
        let table = TableRef::new("public", "we\"ird");
        assert_eq!(table.quoted(), "\"public\".\"we\"\"ird\"");
    }

    #[test]
    fn dump_file_name_never_contains_separators() {
        assert_eq!(TableRef::new("auth", "users").dump_file_name(), "auth_users.jsonl");
        assert_eq!(TableRef::new("a/b", "c\\d").dump_file_name(), "a_b_c_d.jsonl");
    }

    #[test]
    fn request_defaults_to_both_kinds() -> anyhow::Result<()> {
        let request: BackupRequest = serde_json::from_str("{}")?;
        assert_eq!(request.requested_kinds(), vec![BackupKind::Database, BackupKind::Code]);
        assert_eq!(request.note, "");
        Ok(())
    }

    #[test]
    fn run_serializes_kinds_as_labels() -> anyhow::Result<()> {
        let request = BackupRequest {
            include_code: false,
            include_db: true,
            note: "nightly".into(),
        };
        let mut run = BackupRun::new("2026-01-01_00-00-00".into(), Utc::now(), &request);
        run.mark_completed(BackupKind::Database);
        run.mark_completed(BackupKind::Database);
        run.file_manifest.push("public_a.jsonl".into());

        let value = serde_json::to_value(&run)?;
        assert_eq!(value["completed_types"], serde_json::json!(["DB"]));
        assert_eq!(value["requested"], serde_json::json!(["DB"]));
        assert_eq!(value["files"], serde_json::json!(["public_a.jsonl"]));
        assert!(value.get("failed_tables").is_none());
        assert_eq!(run.type_label(), "DB");
        Ok(())
    }
}
