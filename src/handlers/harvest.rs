//! Operator harvest handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::middleware::auth::OperatorContext;
use crate::models::{CaptureRecord, PageQuery, RecordPage, SweepSummary};
use crate::{AppResult, AppState};

/// Get single capture
pub async fn extract(
    State(state): State<AppState>,
    _operator: OperatorContext,
    Path(id): Path<String>,
) -> AppResult<Json<CaptureRecord>> {
    let record = state.harvester.extract(&id).await?;
    Ok(Json(record))
}

/// Delete single capture
pub async fn delete(
    State(state): State<AppState>,
    operator: OperatorContext,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.harvester.delete(&id).await?;

    tracing::info!("Capture deleted: {} by {}", id, operator.subject);

    Ok(Json(serde_json::json!({
        "success": true,
        "id": id
    })))
}

/// List captures in creation order, optionally paged
pub async fn extract_all(
    State(state): State<AppState>,
    _operator: OperatorContext,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<RecordPage>> {
    let page = state.harvester.extract_all(&query).await?;
    Ok(Json(page))
}

/// Run the maintenance sweep
pub async fn update_all(
    State(state): State<AppState>,
    operator: OperatorContext,
) -> AppResult<Json<SweepSummary>> {
    tracing::info!("Maintenance sweep started by {}", operator.subject);
    let summary = state.harvester.update_all().await?;
    Ok(Json(summary))
}

/// Delete every capture; only routed when bulk delete is enabled
pub async fn delete_all(
    State(state): State<AppState>,
    operator: OperatorContext,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state.harvester.delete_all().await?;

    tracing::warn!("Bulk delete of {} captures by {} ({})", deleted, operator.subject, operator.role);

    Ok(Json(serde_json::json!({
        "success": true,
        "deleted": deleted
    })))
}
