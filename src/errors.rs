use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to dump table {table}: {reason}")]
    TableDump { table: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Failed to write catalog record: {0}")]
    CatalogWrite(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackupError {
    pub fn table_dump(table: impl ToString, reason: impl ToString) -> Self {
        BackupError::TableDump {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
