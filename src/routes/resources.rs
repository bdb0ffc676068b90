//! Resource management routes
//!
//! Token-authorized inspection, update and deletion of catalogued
//! resources. The management token is a bearer capability: whoever holds
//! it may change or remove the resource.
//!
//! Endpoints:
//! - GET /api/resources/:id?token= - Record details
//! - PATCH /api/resources/:id - Update expiry, name or one-time flag
//! - DELETE /api/resources/:id?token= - Delete file and record

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ResourceRecord;
use crate::error::{AppError, Result};
use crate::ids::is_valid_id;
use crate::state::AppState;
use crate::upload::finalizer::days_until;
use crate::upload::service::clean_filename;

/// Create the resources router
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/resources/:id",
        get(get_resource).patch(update_resource).delete(delete_resource),
    )
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResourceRequest {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub original_name: Option<String>,
    pub one_time_view: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    #[serde(flatten)]
    pub record: ResourceRecord,
    pub file_url: String,
    /// Latest explicit expiry the resource may be given right now
    pub max_expires_at: DateTime<Utc>,
    pub expires_in_days: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: &'static str,
    pub id: String,
}

/// GET /api/resources/:id
async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ResourceResponse>> {
    let record = authorize(&state, &id, query.token.as_deref()).await?;
    Ok(Json(describe(&state, record)))
}

/// PATCH /api/resources/:id
async fn update_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateResourceRequest>,
) -> Result<Json<ResourceResponse>> {
    let mut record = authorize(&state, &id, Some(&request.token)).await?;
    let now = Utc::now();

    if let Some(expires_at) = request.expires_at {
        if !state.retention().is_valid_expiry(expires_at, record.size, now) {
            return Err(AppError::BadRequest(format!(
                "expires_at must be between now and {}",
                state.retention().max_expiry(record.size, now).to_rfc3339()
            )));
        }
        record.expires_at = Some(expires_at);
    }

    if let Some(name) = request.original_name.as_deref() {
        record.original_name = clean_filename(name)
            .ok_or_else(|| AppError::BadRequest("original_name must not be empty".to_string()))?;
    }

    if let Some(one_time_view) = request.one_time_view {
        record.one_time_view = one_time_view;
    }

    record.updated_at = now;
    state.catalog().store(&record).await?;

    tracing::info!(
        id = %record.id,
        expires_at = ?record.expires_at,
        one_time_view = record.one_time_view,
        "Resource updated"
    );

    Ok(Json(describe(&state, record)))
}

/// DELETE /api/resources/:id
async fn delete_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<DeleteResponse>> {
    let record = authorize(&state, &id, query.token.as_deref()).await?;

    // File first, so a failure leaves the governing record in place
    if record.has_backing_file() {
        let path = state.uploads().finalizer().artifact_path(&record.id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    state.catalog().delete(&record.id).await?;

    tracing::info!(id = %record.id, "Resource deleted by owner");

    Ok(Json(DeleteResponse {
        message: "Resource deleted",
        id: record.id,
    }))
}

/// Load `id` and check the presented token against it
async fn authorize(state: &AppState, id: &str, token: Option<&str>) -> Result<ResourceRecord> {
    if !is_valid_id(id) {
        return Err(AppError::NotFound(format!("Resource not found: {}", id)));
    }

    let record = state
        .catalog()
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resource not found: {}", id)))?;

    match token {
        Some(token) if token == record.management_token => Ok(record),
        _ => Err(AppError::Unauthorized),
    }
}

fn describe(state: &AppState, record: ResourceRecord) -> ResourceResponse {
    let now = Utc::now();
    let retention = state.retention();

    ResourceResponse {
        file_url: state.uploads().finalizer().file_url(&record.id),
        max_expires_at: retention.max_expiry(record.size, now),
        expires_in_days: record.expires_at.map(|at| days_until(at, now)),
        record,
    }
}
