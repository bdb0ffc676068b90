//! Upload Service
//!
//! Orchestrates the chunked upload protocol on top of the session
//! registry, the chunk store and the finalizer. Also hosts the single-shot
//! path so both mechanisms share ID reservation and retention.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;

use super::chunk_store::{compute_digest, ChunkStore};
use super::finalizer::{ArtifactInfo, Finalizer};
use super::session::SessionManager;
use super::types::{
    ChunkOutcome, FinalizedUpload, NewUpload, SessionDescriptor, SessionSnapshot, UploadError,
    UploadSession,
};
use crate::catalog::{Catalog, CatalogError};
use crate::config::UploadConfig;
use crate::ids::IdGenerator;

/// Chunked and single-shot uploads
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    sessions: SessionManager,
    chunks: ChunkStore,
    finalizer: Finalizer,
    catalog: Arc<dyn Catalog>,
    ids: IdGenerator,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        config: UploadConfig,
        chunks: ChunkStore,
        catalog: Arc<dyn Catalog>,
        finalizer: Finalizer,
    ) -> Self {
        let sessions = SessionManager::new(chrono::Duration::hours(config.session_ttl_hours));
        let ids = IdGenerator::new(config.id_length, config.id_max_attempts);

        Self {
            inner: Arc::new(UploadServiceInner {
                sessions,
                chunks,
                finalizer,
                catalog,
                ids,
                config,
            }),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.inner.chunks
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.inner.finalizer
    }

    pub fn config(&self) -> &UploadConfig {
        &self.inner.config
    }

    // ========================================================================
    // Chunked Protocol
    // ========================================================================

    /// Start a chunked upload
    pub async fn initiate(&self, mut request: NewUpload) -> Result<SessionDescriptor, UploadError> {
        let config = &self.inner.config;

        request.filename = clean_filename(&request.filename)
            .ok_or_else(|| UploadError::Validation("filename is required".to_string()))?;

        if request.total_size == 0 {
            return Err(UploadError::Validation("size must be positive".to_string()));
        }
        if request.total_size > config.max_upload_size {
            return Err(UploadError::FileTooLarge {
                size: request.total_size,
                max: config.max_upload_size,
            });
        }

        let chunk_size = request.chunk_size.unwrap_or(config.default_chunk_size);
        if chunk_size == 0 || chunk_size > config.max_chunk_size {
            return Err(UploadError::Validation(format!(
                "chunk_size must be between 1 and {} bytes",
                config.max_chunk_size
            )));
        }

        let id = self.reserve_id().await?;

        self.inner
            .chunks
            .create_session_dir(&id)
            .await
            .map_err(|e| UploadError::storage("create chunk directory", e))?;

        let session = UploadSession::new(id.clone(), &request, chunk_size, self.inner.sessions.ttl());
        let session = match self.inner.sessions.insert(session).await {
            Ok(session) => session,
            Err(e) => {
                let _ = self.inner.chunks.delete_session(&id).await;
                return Err(e);
            }
        };

        Ok(session.descriptor())
    }

    /// Accept one chunk; the chunk completing the set triggers finalization
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: u64,
        data: &[u8],
    ) -> Result<ChunkOutcome, UploadError> {
        let session = self.inner.sessions.get(session_id).await?;

        if session.is_expired_at(Utc::now()) {
            self.evict(&session).await;
            return Err(UploadError::SessionExpired(session_id.to_string()));
        }

        if index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfBounds {
                index,
                total: session.total_chunks,
            });
        }

        // Retried chunk: nothing to write, nothing to trigger
        if session.is_uploaded(index) {
            return Ok(in_progress(&session));
        }

        if data.is_empty() {
            return Err(UploadError::MissingChunk);
        }
        // The last chunk may be short but never carries bytes past total_size
        let expected = session.expected_chunk_len(index).unwrap_or(session.chunk_size);
        if data.len() as u64 > expected {
            return Err(UploadError::Validation(format!(
                "chunk {} is {} bytes, at most {} expected",
                index,
                data.len(),
                expected
            )));
        }

        if let Err(e) = self.inner.chunks.write_chunk(session_id, index, data).await {
            // Reclaimed while the write was in flight
            if !self.inner.sessions.contains(session_id).await {
                return Err(UploadError::SessionNotFound(session_id.to_string()));
            }
            tracing::warn!(session_id = %session_id, chunk_index = index, error = %e, "Chunk write failed");
            return Err(UploadError::storage("chunk write failed", e));
        }

        let mark = session.mark_uploaded(index);

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            uploaded = mark.uploaded,
            total = session.total_chunks,
            "Chunk stored"
        );

        if mark.newly_marked && mark.uploaded == session.total_chunks {
            if !self.inner.sessions.remove_if_same(session_id, &session).await {
                // Only reclamation removes a session we did not claim
                return Err(UploadError::SessionExpired(session_id.to_string()));
            }
            let finalized = self.inner.finalizer.finalize(&session, &self.inner.chunks).await?;
            return Ok(ChunkOutcome::Completed(finalized));
        }

        Ok(in_progress(&session))
    }

    /// Snapshot of a session
    pub async fn status(&self, session_id: &str) -> Result<SessionSnapshot, UploadError> {
        let session = self.inner.sessions.get(session_id).await?;

        if session.is_expired_at(Utc::now()) {
            self.evict(&session).await;
            return Err(UploadError::SessionExpired(session_id.to_string()));
        }

        Ok(session.snapshot())
    }

    /// Drop sessions past their TTL and chunk directories nobody owns
    ///
    /// Returns the number of sessions and directories removed.
    pub async fn reclaim_abandoned(&self) -> usize {
        let mut reclaimed = 0;

        for session in self.inner.sessions.expired_sessions(Utc::now()).await {
            if self.evict(&session).await {
                reclaimed += 1;
            }
        }

        reclaimed + self.reclaim_stale_dirs().await
    }

    async fn reclaim_stale_dirs(&self) -> usize {
        let dirs = match self.inner.chunks.list_session_dirs().await {
            Ok(dirs) => dirs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list chunk directories");
                return 0;
            }
        };

        let active = self.inner.sessions.active_ids().await;
        let ttl = self
            .inner
            .sessions
            .ttl()
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let now = SystemTime::now();
        let mut removed = 0;

        for (name, modified) in dirs {
            if active.contains(&name) {
                continue;
            }
            let age = now.duration_since(modified).unwrap_or_default();
            if age < ttl {
                continue;
            }
            match self.inner.chunks.delete_session(&name).await {
                Ok(()) => {
                    tracing::info!(session_id = %name, "Removed stale chunk directory");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(session_id = %name, error = %e, "Failed to remove stale chunk directory");
                }
            }
        }

        removed
    }

    /// Remove a session and its chunks if it is still registered
    async fn evict(&self, session: &Arc<UploadSession>) -> bool {
        if !self.inner.sessions.remove_if_same(&session.id, session).await {
            return false;
        }

        if let Err(e) = self.inner.chunks.delete_session(&session.id).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to delete chunk directory");
        }

        tracing::info!(
            session_id = %session.id,
            uploaded = session.uploaded_count(),
            total = session.total_chunks,
            "Reclaimed expired upload session"
        );
        true
    }

    // ========================================================================
    // Single-shot Upload
    // ========================================================================

    /// Store a whole file received in one request
    pub async fn store_file(
        &self,
        request: NewUpload,
        data: &[u8],
    ) -> Result<FinalizedUpload, UploadError> {
        let original_name = clean_filename(&request.filename)
            .ok_or_else(|| UploadError::Validation("filename is required".to_string()))?;

        if data.is_empty() {
            return Err(UploadError::Validation("file is empty".to_string()));
        }
        let size = data.len() as u64;
        if size > self.inner.config.max_upload_size {
            return Err(UploadError::FileTooLarge {
                size,
                max: self.inner.config.max_upload_size,
            });
        }

        let id = self.reserve_id().await?;
        let dest = self.inner.finalizer.artifact_path(&id);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::storage("create storage root", e))?;
        }
        if let Err(e) = tokio::fs::write(&dest, data).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(UploadError::storage("write file", e));
        }

        let artifact = ArtifactInfo {
            id: id.clone(),
            original_name,
            size,
            digest: compute_digest(data),
            requested_expiry: request.expires_at,
            one_time_view: request.one_time_view,
            uploader_ip: request.uploader_ip,
        };

        match self.inner.finalizer.commit(artifact).await {
            Ok(finalized) => {
                tracing::info!(id = %id, size = size, "Stored single-shot upload");
                Ok(finalized)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&dest).await;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    /// A fresh ID free in both the catalog and the session registry
    pub async fn reserve_id(&self) -> Result<String, UploadError> {
        let catalog = Arc::clone(&self.inner.catalog);
        let sessions = self.inner.sessions.clone();

        let id = self
            .inner
            .ids
            .generate(move |candidate| {
                let catalog = Arc::clone(&catalog);
                let sessions = sessions.clone();
                async move {
                    if sessions.contains(&candidate).await {
                        return Ok(true);
                    }
                    let existing = catalog.get_by_id(&candidate).await?;
                    Ok::<_, CatalogError>(existing.is_some())
                }
            })
            .await?;

        Ok(id)
    }
}

fn in_progress(session: &UploadSession) -> ChunkOutcome {
    ChunkOutcome::InProgress {
        progress: session.progress(),
        uploaded: session.uploaded_count(),
        total: session.total_chunks,
    }
}

/// Last path component of a client-supplied filename
pub fn clean_filename(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.chars().filter(|c| !c.is_control()).collect())
}

// ============================================================================
// Tests
// ============================================================================
