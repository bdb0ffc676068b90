//! Upload Routes
//!
//! HTTP endpoints for resumable chunked uploads and single-shot uploads.
//!
//! Endpoints:
//! - POST /upload/init - Start a chunked upload (urlencoded or multipart form)
//! - POST /upload/chunk/:upload_id/:index - Upload one chunk (multipart `chunk`)
//! - GET /upload/status/:upload_id - Session status
//! - POST /upload - Whole file in one request (multipart `file`)

use axum::{
    async_trait,
    body::Bytes,
    extract::{multipart::Field, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::is_valid_id;
use crate::routes::client_ip;
use crate::state::AppState;
use crate::upload::{
    ChunkOutcome, FinalizedUpload, NewUpload, SessionDescriptor, SessionSnapshot, UploadError,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = match &self {
            UploadError::Validation(_) => "VALIDATION_ERROR",
            UploadError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            UploadError::ChunkIndexOutOfBounds { .. } => "CHUNK_INDEX_OUT_OF_BOUNDS",
            UploadError::MissingChunk => "MISSING_CHUNK",
            UploadError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            UploadError::SessionExpired(_) => "SESSION_EXPIRED",
            UploadError::IdGenerationExhausted(_) => "ID_GENERATION_EXHAUSTED",
            UploadError::Storage(_) => "STORAGE_ERROR",
            UploadError::Catalog(_) => "CATALOG_ERROR",
            UploadError::Internal(_) => "INTERNAL_ERROR",
        };

        // Server-side failures carry paths and driver messages
        let error = if status.is_server_error() {
            tracing::error!(error = %self, code = code, "Upload request failed");
            "Upload failed due to a server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_whole))
        .route("/upload/init", post(init))
        .route("/upload/chunk/:upload_id/:index", post(upload_chunk))
        .route("/upload/status/:upload_id", get(status))
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Raw init form; parsed by hand so bad values answer 400
///
/// Accepted as urlencoded or multipart. A request with neither body type
/// is read as an empty form.
#[derive(Debug, Default, Deserialize)]
struct InitForm {
    filename: Option<String>,
    size: Option<String>,
    chunk_size: Option<String>,
    expires_at: Option<String>,
    one_time_view: Option<String>,
}

#[async_trait]
impl<S> FromRequest<S> for InitForm
where
    S: Send + Sync,
{
    type Rejection = UploadError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state).await.map_err(|e| {
                UploadError::Validation(format!("malformed multipart body: {}", e.body_text()))
            })?;
            return InitForm::from_multipart(&mut multipart).await;
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(form) = Form::<InitForm>::from_request(req, state)
                .await
                .map_err(|e| UploadError::Validation(e.body_text()))?;
            return Ok(form);
        }

        Ok(InitForm::default())
    }
}

impl InitForm {
    async fn from_multipart(multipart: &mut Multipart) -> Result<Self, UploadError> {
        let mut form = InitForm::default();

        while let Some(field) = next_field(multipart).await? {
            let name = field.name().map(str::to_string);
            let slot = match name.as_deref() {
                Some("filename") => &mut form.filename,
                Some("size") => &mut form.size,
                Some("chunk_size") => &mut form.chunk_size,
                Some("expires_at") => &mut form.expires_at,
                Some("one_time_view") => &mut form.one_time_view,
                _ => continue,
            };
            *slot = Some(field_text(field).await?);
        }

        Ok(form)
    }
}

#[derive(Debug, Serialize)]
struct ChunkResponse {
    message: &'static str,
    progress: u8,
    #[serde(flatten)]
    completion: Option<FinalizedUpload>,
}

impl ChunkResponse {
    fn completed(finalized: FinalizedUpload) -> Self {
        Self {
            message: "Upload completed",
            progress: 100,
            completion: Some(finalized),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload/init
async fn init(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: InitForm,
) -> Result<Json<SessionDescriptor>, UploadError> {
    let total_size = match non_empty(form.size) {
        Some(raw) => parse_size("size", &raw)?,
        None => return Err(UploadError::Validation("size is required".to_string())),
    };
    let chunk_size = non_empty(form.chunk_size)
        .map(|raw| parse_size("chunk_size", &raw))
        .transpose()?;

    let request = NewUpload {
        filename: form.filename.unwrap_or_default(),
        total_size,
        chunk_size,
        expires_at: parse_expiry(form.expires_at)?,
        one_time_view: parse_flag(form.one_time_view.as_deref()),
        uploader_ip: client_ip(&headers),
    };

    let descriptor = state.uploads().initiate(request).await?;
    Ok(Json(descriptor))
}

/// POST /upload/chunk/:upload_id/:index
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, index)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>, UploadError> {
    // Unknown sessions answer 404 whatever the index looks like
    if !is_valid_id(&upload_id) || !state.uploads().sessions().contains(&upload_id).await {
        return Err(UploadError::SessionNotFound(upload_id));
    }
    let index = index
        .parse::<u64>()
        .map_err(|_| UploadError::Validation(format!("invalid chunk index: {}", index)))?;

    let mut chunk = None;
    while let Some(field) = next_field(&mut multipart).await? {
        let is_chunk = field.name() == Some("chunk");
        if is_chunk {
            chunk = Some(collect_field(field).await?);
            break;
        }
    }
    let chunk = chunk.ok_or(UploadError::MissingChunk)?;

    let response = match state.uploads().upload_chunk(&upload_id, index, &chunk).await? {
        ChunkOutcome::InProgress { progress, .. } => ChunkResponse {
            message: "Chunk uploaded",
            progress,
            completion: None,
        },
        ChunkOutcome::Completed(finalized) => ChunkResponse::completed(finalized),
    };

    Ok(Json(response))
}

/// GET /upload/status/:upload_id
async fn status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<SessionSnapshot>, UploadError> {
    if !is_valid_id(&upload_id) {
        return Err(UploadError::SessionNotFound(upload_id));
    }
    let snapshot = state.uploads().status(&upload_id).await?;
    Ok(Json(snapshot))
}

/// POST /upload
///
/// Single-shot upload: multipart with a `file` part and optional
/// `expires_at` / `one_time_view` text parts.
async fn upload_whole(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>, UploadError> {
    let mut file = None;
    let mut expires_at = None;
    let mut one_time_view = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                file = Some((filename, collect_field(field).await?));
            }
            Some("expires_at") => expires_at = Some(field_text(field).await?),
            Some("one_time_view") => one_time_view = Some(field_text(field).await?),
            _ => {}
        }
    }

    let (filename, data) =
        file.ok_or_else(|| UploadError::Validation("file part is required".to_string()))?;

    let request = NewUpload {
        filename,
        total_size: data.len() as u64,
        chunk_size: None,
        expires_at: parse_expiry(expires_at)?,
        one_time_view: parse_flag(one_time_view.as_deref()),
        uploader_ip: client_ip(&headers),
    };

    let finalized = state.uploads().store_file(request, &data).await?;
    Ok(Json(ChunkResponse::completed(finalized)))
}

// ============================================================================
// Helpers
// ============================================================================

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>, UploadError> {
    multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Validation(format!("malformed multipart body: {}", e)))
}

async fn collect_field(field: Field<'_>) -> Result<Bytes, UploadError> {
    field
        .bytes()
        .await
        .map_err(|e| UploadError::Validation(format!("unreadable multipart field: {}", e)))
}

async fn field_text(field: Field<'_>) -> Result<String, UploadError> {
    field
        .text()
        .await
        .map_err(|e| UploadError::Validation(format!("unreadable multipart field: {}", e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_size(name: &str, raw: &str) -> Result<u64, UploadError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| UploadError::Validation(format!("{} must be a non-negative integer", name)))
}

/// Optional RFC 3339 expiry; range checks happen at finalize
fn parse_expiry(raw: Option<String>) -> Result<Option<DateTime<Utc>>, UploadError> {
    non_empty(raw)
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|_| UploadError::Validation(format!("invalid expires_at: {}", raw)))
        })
        .transpose()
}

pub(crate) fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "on" | "yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some(" ON ")));
        assert!(parse_flag(Some("1")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(Some("")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry(None).unwrap(), None);
        assert_eq!(parse_expiry(Some("  ".to_string())).unwrap(), None);

        let parsed = parse_expiry(Some("2030-01-02T03:04:05+02:00".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2030-01-02T01:04:05+00:00");

        assert!(matches!(
            parse_expiry(Some("tomorrow".to_string())),
            Err(UploadError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_size_rejects_negative() {
        assert_eq!(parse_size("size", " 10 ").unwrap(), 10);
        assert!(parse_size("size", "-5").is_err());
        assert!(parse_size("size", "ten").is_err());
    }
}
