//! Upload types for resumable chunked uploads

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::catalog::CatalogError;
use crate::ids::IdError;

// ============================================================================
// Requests
// ============================================================================

/// Parameters for a new chunked upload
#[derive(Debug, Clone, Default)]
pub struct NewUpload {
    pub filename: String,
    pub total_size: u64,
    /// Falls back to the configured default when absent
    pub chunk_size: Option<u64>,
    /// Explicit expiry requested by the client, range-checked at finalize
    pub expires_at: Option<DateTime<Utc>>,
    pub one_time_view: bool,
    pub uploader_ip: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// Returned by upload initiation
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub uploaded_chunks: Vec<u64>,
}

/// Read-only view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub upload_id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub uploaded_chunks: Vec<u64>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A stored, catalogued artifact
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedUpload {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub size: u64,
    pub file_url: String,
    /// Hex digests of the stored file, empty when hashing failed
    pub md5: String,
    pub sha256: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_days: f64,
}

/// Result of accepting one chunk
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// More chunks are outstanding (or another request is finalizing)
    InProgress { progress: u8, uploaded: u64, total: u64 },
    /// This chunk completed the upload and the artifact is stored
    Completed(FinalizedUpload),
}

// ============================================================================
// Session
// ============================================================================

/// Number of chunks needed to carry `total_size` bytes
pub fn total_chunks_for(total_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_size / chunk_size + u64::from(total_size % chunk_size != 0)
}

/// Outcome of marking a chunk index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkResult {
    /// False when the index was already marked
    pub newly_marked: bool,
    pub uploaded: u64,
}

/// In-progress chunked upload
///
/// Descriptive fields are immutable after creation. The uploaded-chunk set
/// has its own lock so writes to different sessions never contend.
#[derive(Debug)]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub requested_expiry: Option<DateTime<Utc>>,
    pub one_time_view: bool,
    pub uploader_ip: Option<String>,
    uploaded_chunks: Mutex<BTreeSet<u64>>,
}

impl UploadSession {
    /// Create a session; `chunk_size` must be non-zero
    pub fn new(id: String, request: &NewUpload, chunk_size: u64, ttl: Duration) -> Self {
        let now = Utc::now();

        Self {
            id,
            filename: request.filename.clone(),
            total_size: request.total_size,
            chunk_size,
            total_chunks: total_chunks_for(request.total_size, chunk_size),
            created_at: now,
            expires_at: now + ttl,
            requested_expiry: request.expires_at,
            one_time_view: request.one_time_view,
            uploader_ip: request.uploader_ip.clone(),
            uploaded_chunks: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Expected byte length of chunk `index`; only the last chunk may be short
    pub fn expected_chunk_len(&self, index: u64) -> Option<u64> {
        if index >= self.total_chunks {
            return None;
        }
        if index + 1 == self.total_chunks {
            Some(self.total_size - index * self.chunk_size)
        } else {
            Some(self.chunk_size)
        }
    }

    pub fn is_uploaded(&self, index: u64) -> bool {
        self.uploaded_chunks.lock().contains(&index)
    }

    /// Mark `index` as persisted. Callers validate the range first.
    pub fn mark_uploaded(&self, index: u64) -> MarkResult {
        debug_assert!(index < self.total_chunks);
        let mut uploaded = self.uploaded_chunks.lock();
        let newly_marked = uploaded.insert(index);
        MarkResult {
            newly_marked,
            uploaded: uploaded.len() as u64,
        }
    }

    pub fn uploaded_count(&self) -> u64 {
        self.uploaded_chunks.lock().len() as u64
    }

    /// Uploaded indices in ascending order
    pub fn uploaded_indices(&self) -> Vec<u64> {
        self.uploaded_chunks.lock().iter().copied().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_count() == self.total_chunks
    }

    /// Whole-percent progress, rounded down
    pub fn progress(&self) -> u8 {
        progress_percent(self.uploaded_count(), self.total_chunks)
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            upload_id: self.id.clone(),
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            uploaded_chunks: self.uploaded_indices(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        // One lock acquisition so indices and progress agree
        let uploaded = self.uploaded_indices();
        let progress = progress_percent(uploaded.len() as u64, self.total_chunks);

        SessionSnapshot {
            upload_id: self.id.clone(),
            filename: self.filename.clone(),
            total_size: self.total_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            uploaded_chunks: uploaded,
            progress,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// `floor(100 * uploaded / total)`
pub fn progress_percent(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (u128::from(uploaded) * 100) / u128::from(total);
    percent.min(100) as u8
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Chunk index out of bounds: {index} (total: {total})")]
    ChunkIndexOutOfBounds { index: u64, total: u64 },

    #[error("Missing chunk payload")]
    MissingChunk,

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    #[error("No free identifier after {0} attempts")]
    IdGenerationExhausted(u32),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::FileTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::ChunkIndexOutOfBounds { .. } => StatusCode::BAD_REQUEST,
            Self::MissingChunk => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::IdGenerationExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn storage(context: &str, err: std::io::Error) -> Self {
        Self::Storage(format!("{}: {}", context, err))
    }
}

impl From<IdError> for UploadError {
    fn from(err: IdError) -> Self {
        match err {
            IdError::Exhausted(attempts) => Self::IdGenerationExhausted(attempts),
            IdError::Probe(e) => Self::Catalog(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total_size: u64, chunk_size: u64) -> UploadSession {
        let request = NewUpload {
            filename: "digits.txt".to_string(),
            total_size,
            ..Default::default()
        };
        UploadSession::new("abc".to_string(), &request, chunk_size, Duration::hours(24))
    }

    #[test]
    fn test_total_chunks_is_ceiling() {
        assert_eq!(total_chunks_for(10, 5), 2);
        assert_eq!(total_chunks_for(11, 5), 3);
        assert_eq!(total_chunks_for(1, 5), 1);
        assert_eq!(total_chunks_for(5, 5), 1);
        assert_eq!(total_chunks_for(u64::MAX, 1), u64::MAX);
        assert_eq!(total_chunks_for(u64::MAX, u64::MAX), 1);
    }

    #[test]
    fn test_last_chunk_length_in_range() {
        for (total, chunk) in [(10, 5), (11, 5), (1, 7), (1000, 3), (4096, 4096)] {
            let s = session(total, chunk);
            let last = s.expected_chunk_len(s.total_chunks - 1).unwrap();
            let remainder = total - (s.total_chunks - 1) * chunk;
            assert!(last > 0 && last <= chunk, "total {} chunk {}", total, chunk);
            assert_eq!(last, remainder);

            let sum: u64 = (0..s.total_chunks)
                .map(|i| s.expected_chunk_len(i).unwrap())
                .sum();
            assert_eq!(sum, total);
        }
        assert_eq!(session(10, 5).expected_chunk_len(2), None);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let s = session(10, 5);
        assert_eq!(s.mark_uploaded(1), MarkResult { newly_marked: true, uploaded: 1 });
        assert_eq!(s.progress(), 50);

        assert_eq!(s.mark_uploaded(1), MarkResult { newly_marked: false, uploaded: 1 });
        assert_eq!(s.progress(), 50);
        assert!(!s.is_complete());

        s.mark_uploaded(0);
        assert!(s.is_complete());
        assert_eq!(s.uploaded_indices(), vec![0, 1]);
        assert_eq!(s.progress(), 100);
    }

    #[test]
    fn test_progress_rounds_down() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(0, 7), 0);
        assert_eq!(progress_percent(7, 7), 100);
    }

    #[test]
    fn test_session_expiry() {
        let s = session(10, 5);
        assert!(!s.is_expired_at(s.created_at + Duration::hours(23)));
        assert!(s.is_expired_at(s.created_at + Duration::hours(25)));
    }
}
