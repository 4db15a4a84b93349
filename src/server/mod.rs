//! HTTP surface consumed by the backup dashboard.
//!
//! Failures of `create` are reported in the body (`success: false`) with a
//! 200 status, which is what the dashboard expects.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::backup::catalog::CatalogEntry;
use crate::backup::db_dump::Connector;
use crate::backup::logic::BackupOrchestrator;
use crate::backup::model::{BackupKind, BackupRequest, RunSummary};
use crate::utils::format_size_mb;

#[derive(Debug, Serialize)]
pub struct BackupListItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub type_label: String,
    pub completed_types: Vec<BackupKind>,
    pub note: String,
    pub files: Vec<String>,
    pub size: String,
    pub size_bytes: u64,
}

impl From<CatalogEntry> for BackupListItem {
    fn from(entry: CatalogEntry) -> Self {
        let type_label = entry.run.type_label();
        Self {
            id: entry.run.id,
            created_at: entry.run.created_at,
            type_label,
            completed_types: entry.run.completed_types,
            note: entry.run.note,
            files: entry.run.file_manifest,
            size: format_size_mb(entry.size_bytes),
            size_bytes: entry.size_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateBackupResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl CreateBackupResponse {
    fn created(summary: &RunSummary) -> Self {
        let message = if summary.failed_tables.is_empty() {
            "Backup created successfully".to_string()
        } else {
            format!(
                "Backup created successfully ({} tables failed to dump)",
                summary.failed_tables.len()
            )
        };
        Self {
            success: true,
            message,
            backup_id: Some(summary.backup_id.clone()),
            path: Some(summary.path.display().to_string()),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            backup_id: None,
            path: None,
        }
    }
}

pub fn router<C>(orchestrator: Arc<BackupOrchestrator<C>>) -> Router
where
    C: Connector + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/backup/list", get(list_backups::<C>))
        .route("/api/backup/create", post(create_backup::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_backups<C>(State(orchestrator): State<Arc<BackupOrchestrator<C>>>) -> Response
where
    C: Connector + 'static,
{
    match orchestrator.list().await {
        Ok(entries) => {
            let backups: Vec<BackupListItem> = entries.into_iter().map(Into::into).collect();
            Json(json!({ "backups": backups })).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to list backups");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "backups": [], "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn create_backup<C>(
    State(orchestrator): State<Arc<BackupOrchestrator<C>>>,
    Json(request): Json<BackupRequest>,
) -> Json<CreateBackupResponse>
where
    C: Connector + 'static,
{
    match orchestrator.create(request).await {
        Ok(summary) => Json(CreateBackupResponse::created(&summary)),
        Err(e) => Json(CreateBackupResponse::failed(e.to_string())),
    }
}

pub async fn serve<C>(orchestrator: Arc<BackupOrchestrator<C>>, addr: SocketAddr) -> anyhow::Result<()>
where
    C: Connector + 'static,
{
    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
