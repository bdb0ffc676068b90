//! File serving routes
//!
//! Streams stored artifacts from the storage root. One-time-view files are
//! consumed by the first retrieval that does not look like a link preview.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};
use crate::ids::is_valid_id;
use crate::state::AppState;

/// User-Agent fragments of crawlers and chat link unfurlers
const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "preview",
    "facebookexternalhit",
    "embedly",
    "whatsapp",
    "telegram",
    "discord",
    "slack",
    "skype",
];

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new().route("/:id", get(serve_file))
}

/// GET /:id
async fn serve_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    if !is_valid_id(&id) {
        return Err(AppError::NotFound(format!("Resource not found: {}", id)));
    }

    let catalog = state.catalog();
    let record = catalog
        .get_by_id(&id)
        .await?
        .filter(|record| record.has_backing_file())
        .ok_or_else(|| AppError::NotFound(format!("Resource not found: {}", id)))?;

    // The sweeper may not have reached it yet
    if state.retention().check_expired(&record, Utc::now()) {
        return Err(AppError::Gone("Resource has expired".to_string()));
    }

    let path = state.uploads().finalizer().artifact_path(&id);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("Resource not found: {}", id)));
        }
        Err(e) => return Err(e.into()),
    };
    let length = file.metadata().await?.len();

    let consume = record.one_time_view && !is_bot(&headers);
    if consume {
        // Whoever deletes the record owns the single view
        if !catalog.delete(&id).await? {
            return Err(AppError::Gone("Resource was already viewed".to_string()));
        }
        // The open handle keeps the content readable
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(id = %id, error = %e, "Failed to remove one-time file");
        }
        tracing::info!(id = %id, "One-time resource consumed");
    } else if let Err(e) = catalog.record_access(&id).await {
        tracing::warn!(id = %id, error = %e, "Failed to record access");
    }

    let cache_control = if record.one_time_view {
        "no-store"
    } else {
        "private, max-age=3600"
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.content_type.as_str())
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, content_disposition(&record.original_name))
        .header(header::CACHE_CONTROL, cache_control)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn content_disposition(original_name: &str) -> String {
    let ascii: String = original_name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(original_name)
    )
}

fn is_bot(headers: &HeaderMap) -> bool {
    let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let agent = agent.to_ascii_lowercase();
    BOT_MARKERS.iter().any(|marker| agent.contains(marker))
}
