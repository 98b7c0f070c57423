//! Admin backup handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use tokio_util::io::ReaderStream;

use invhub_core::error::AppError;

use crate::dto::request::DownloadQuery;
use crate::extractors::AdminActor;
use crate::state::AppState;

/// GET /api/admin/backups
pub async fn list_backups(
    State(state): State<AppState>,
    actor: AdminActor,
) -> Result<Json<serde_json::Value>, AppError> {
    let snapshots = state.backup_service.list_snapshots(&actor).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": snapshots,
        "total": snapshots.len(),
    })))
}

/// POST /api/admin/backups
pub async fn create_backup(
    State(state): State<AppState>,
    actor: AdminActor,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let snapshot = state.backup_service.create_snapshot(&actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": snapshot })),
    ))
}

/// GET /api/admin/backups/{name}
pub async fn get_backup(
    State(state): State<AppState>,
    actor: AdminActor,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state.backup_service.get_snapshot(&actor, &name).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": snapshot })))
}

/// GET /api/admin/backups/{name}/verify
pub async fn verify_backup(
    State(state): State<AppState>,
    actor: AdminActor,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state.backup_service.verify_snapshot(&actor, &name).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": report })))
}

/// GET /api/admin/backups/{name}/download?verify=true
pub async fn download_backup(
    State(state): State<AppState>,
    actor: AdminActor,
    Path(name): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let download = state
        .backup_service
        .download(&actor, &name, query.verify)
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.filename),
        )
        .header(header::CONTENT_LENGTH, download.size_bytes)
        .body(Body::from_stream(ReaderStream::new(download.file)))
        .map_err(|e| AppError::internal(format!("Response build failed: {e}")))
}

/// POST /api/admin/backups/{name}/restore
pub async fn restore_backup(
    State(state): State<AppState>,
    actor: AdminActor,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state.backup_service.restore_snapshot(&actor, &name).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": report.notice,
        "data": report,
    })))
}

/// DELETE /api/admin/backups/{name}
pub async fn delete_backup(
    State(state): State<AppState>,
    actor: AdminActor,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state.backup_service.delete_snapshot(&actor, &name).await?;
    Ok(Json(serde_json::json!({ "success": true, "data": report })))
}
