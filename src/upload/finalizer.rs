//! Upload finalization
//!
//! Turns a completed session into a stored artifact and a catalog record.
//! The record is written only after the merge succeeded; a failed merge
//! leaves nothing behind and the client starts over.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::chunk_store::{digest_file, ChunkStore, ContentDigest};
use super::types::{FinalizedUpload, UploadError, UploadSession};
use crate::catalog::{Catalog, CatalogError, ResourceRecord};
use crate::ids::IdGenerator;
use crate::retention::RetentionCalculator;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Everything needed to catalogue a file already placed under the storage root
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub id: String,
    pub original_name: String,
    pub size: u64,
    pub digest: ContentDigest,
    pub requested_expiry: Option<DateTime<Utc>>,
    pub one_time_view: bool,
    pub uploader_ip: Option<String>,
}

/// Merges chunks and writes catalog records
#[derive(Clone)]
pub struct Finalizer {
    catalog: Arc<dyn Catalog>,
    retention: RetentionCalculator,
    tokens: IdGenerator,
    storage_root: PathBuf,
    base_url: String,
}

impl Finalizer {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        retention: RetentionCalculator,
        tokens: IdGenerator,
        storage_root: PathBuf,
        base_url: String,
    ) -> Self {
        Self {
            catalog,
            retention,
            tokens,
            storage_root,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Where the artifact for `id` lives
    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.storage_root.join(id)
    }

    /// Merge a completed session and record it
    ///
    /// The caller must already have removed the session from the registry,
    /// so no chunk writes can race the merge. Chunks are deleted whether
    /// or not the merge succeeds.
    pub async fn finalize(
        &self,
        session: &UploadSession,
        chunks: &ChunkStore,
    ) -> Result<FinalizedUpload, UploadError> {
        let dest = self.artifact_path(&session.id);

        if !session.is_complete() {
            self.discard(&session.id, &dest, chunks).await;
            return Err(UploadError::Internal(format!(
                "session {} finalized with {}/{} chunks",
                session.id,
                session.uploaded_count(),
                session.total_chunks
            )));
        }

        tracing::info!(
            session_id = %session.id,
            filename = %session.filename,
            chunks = session.total_chunks,
            "Assembling file from chunks"
        );

        let size = match chunks.merge_into(&session.id, session.total_chunks, &dest).await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "Chunk merge failed");
                self.discard(&session.id, &dest, chunks).await;
                return Err(UploadError::storage("merge failed", e));
            }
        };

        let digest = digest_or_empty(&session.id, &dest).await;

        let artifact = ArtifactInfo {
            id: session.id.clone(),
            original_name: session.filename.clone(),
            size,
            digest,
            requested_expiry: session.requested_expiry,
            one_time_view: session.one_time_view,
            uploader_ip: session.uploader_ip.clone(),
        };

        let finalized = match self.commit(artifact).await {
            Ok(finalized) => finalized,
            Err(e) => {
                self.discard(&session.id, &dest, chunks).await;
                return Err(e);
            }
        };

        if let Err(e) = chunks.delete_session(&session.id).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to delete chunk directory");
        }

        tracing::info!(
            session_id = %session.id,
            size = size,
            expires_at = %finalized.expires_at,
            "Upload finalized"
        );

        Ok(finalized)
    }

    /// Catalogue an artifact that is already in place under the storage root
    ///
    /// Issues the management token, resolves the expiry and stores the
    /// record. On failure the caller owns cleanup of the artifact.
    pub async fn commit(&self, artifact: ArtifactInfo) -> Result<FinalizedUpload, UploadError> {
        let token = self.issue_token().await?;
        let now = Utc::now();
        let expires_at = self
            .retention
            .resolve_expiry(artifact.requested_expiry, artifact.size, now);
        let content_type = mime_guess::from_path(&artifact.original_name)
            .first_or_octet_stream()
            .to_string();

        let mut record = ResourceRecord::new_file(
            artifact.id,
            token,
            artifact.original_name,
            artifact.size,
            content_type,
        );
        record.content_hash = artifact.digest.sha256.clone();
        record.expires_at = Some(expires_at);
        record.one_time_view = artifact.one_time_view;
        record.uploader_ip = artifact.uploader_ip;

        self.catalog.store(&record).await?;

        Ok(self.describe(&record, &artifact.digest, expires_at, now))
    }

    /// A management token unique across the catalog
    pub async fn issue_token(&self) -> Result<String, UploadError> {
        let catalog = Arc::clone(&self.catalog);
        let token = self
            .tokens
            .generate(move |candidate| {
                let catalog = Arc::clone(&catalog);
                async move {
                    let existing = catalog.get_by_token(&candidate).await?;
                    Ok::<_, CatalogError>(existing.is_some())
                }
            })
            .await?;
        Ok(token)
    }

    pub fn file_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }

    fn describe(
        &self,
        record: &ResourceRecord,
        digest: &ContentDigest,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> FinalizedUpload {
        FinalizedUpload {
            id: record.id.clone(),
            size: record.size,
            file_url: self.file_url(&record.id),
            md5: digest.md5.clone(),
            sha256: digest.sha256.clone(),
            token: record.management_token.clone(),
            expires_at,
            expires_in_days: days_until(expires_at, now),
        }
    }

    async fn discard(&self, session_id: &str, dest: &Path, chunks: &ChunkStore) {
        if let Err(e) = tokio::fs::remove_file(dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to remove partial artifact");
            }
        }
        if let Err(e) = chunks.delete_session(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to delete chunk directory");
        }
    }
}

/// Digests of a merged artifact; a failure is logged and yields empty digests
async fn digest_or_empty(session_id: &str, path: &Path) -> ContentDigest {
    match digest_file(path).await {
        Ok(digest) => digest,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Content hash failed");
            ContentDigest::default()
        }
    }
}

/// Fractional days from `now` until `at`, never negative
pub fn days_until(at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (at - now).num_milliseconds() as f64 / 1000.0;
    (seconds / SECONDS_PER_DAY).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool_at, SqliteCatalog};
    use crate::retention::RetentionPolicy;
    use crate::upload::types::NewUpload;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (Finalizer, ChunkStore, Arc<dyn Catalog>) {
        let pool = create_pool_at(&dir.path().join("catalog.db")).await.unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(pool));
        let retention = RetentionCalculator::new(RetentionPolicy::new(1.0, 30.0, 250.0).unwrap());
        let finalizer = Finalizer::new(
            Arc::clone(&catalog),
            retention,
            IdGenerator::new(16, 4),
            dir.path().join("files"),
            "http://files.test/".to_string(),
        );
        (finalizer, ChunkStore::new(dir.path().join("chunks")), catalog)
    }

    /// Session over `total_size` bytes in chunks of 5, with `parts` already stored
    async fn staged(chunks: &ChunkStore, id: &str, total_size: u64, parts: &[&[u8]]) -> UploadSession {
        let request = NewUpload {
            filename: "notes.txt".to_string(),
            total_size,
            ..Default::default()
        };
        let session = UploadSession::new(id.to_string(), &request, 5, chrono::Duration::hours(1));

        chunks.create_session_dir(id).await.unwrap();
        for (index, part) in parts.iter().enumerate() {
            chunks.write_chunk(id, index as u64, part).await.unwrap();
            session.mark_uploaded(index as u64);
        }
        session
    }

    #[tokio::test]
    async fn test_finalize_stores_artifact_and_record() {
        let dir = TempDir::new().unwrap();
        let (finalizer, chunks, catalog) = setup(&dir).await;
        let session = staged(&chunks, "abc", 11, &[b"hello", b" worl", b"d"]).await;

        let finalized = finalizer.finalize(&session, &chunks).await.unwrap();

        assert_eq!(finalized.file_url, "http://files.test/abc");
        assert_eq!(finalized.size, 11);
        assert_eq!(finalized.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            tokio::fs::read(finalizer.artifact_path("abc")).await.unwrap(),
            b"hello world"
        );

        let record = catalog.get_by_id("abc").await.unwrap().unwrap();
        assert_eq!(record.content_hash, finalized.sha256);
        assert_eq!(record.management_token, finalized.token);
        assert!(!chunks.session_dir("abc").exists());
    }

    #[tokio::test]
    async fn test_merge_failure_leaves_no_record() {
        let dir = TempDir::new().unwrap();
        let (finalizer, chunks, catalog) = setup(&dir).await;
        let session = staged(&chunks, "abc", 10, &[b"01234", b"56789"]).await;

        // A regular file where the storage root should be
        std::fs::write(finalizer.storage_root(), b"").unwrap();

        let result = finalizer.finalize(&session, &chunks).await;
        let err = result.unwrap_err();
        assert!(matches!(err, UploadError::Storage(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        assert!(catalog.list_all().await.unwrap().is_empty());
        assert!(!chunks.session_dir("abc").exists());
    }

    #[tokio::test]
    async fn test_incomplete_session_is_not_merged() {
        let dir = TempDir::new().unwrap();
        let (finalizer, chunks, catalog) = setup(&dir).await;
        let session = staged(&chunks, "abc", 10, &[b"01234"]).await;

        assert!(matches!(
            finalizer.finalize(&session, &chunks).await,
            Err(UploadError::Internal(_))
        ));
        assert!(!finalizer.artifact_path("abc").exists());
        assert!(catalog.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_artifact_yields_empty_digest() {
        let dir = TempDir::new().unwrap();
        let (finalizer, _, catalog) = setup(&dir).await;

        let digest = digest_or_empty("abc", &dir.path().join("missing")).await;
        assert_eq!(digest, ContentDigest::default());

        // An empty digest does not fail the upload
        let finalized = finalizer
            .commit(ArtifactInfo {
                id: "abc".to_string(),
                original_name: "notes.txt".to_string(),
                size: 5,
                digest,
                requested_expiry: None,
                one_time_view: false,
                uploader_ip: None,
            })
            .await
            .unwrap();

        assert_eq!(finalized.md5, "");
        assert_eq!(finalized.sha256, "");
        let record = catalog.get_by_id("abc").await.unwrap().unwrap();
        assert_eq!(record.content_hash, "");
    }

    #[test]
    fn test_days_until_never_negative() {
        let now = Utc::now();
        assert_eq!(days_until(now - chrono::Duration::days(1), now), 0.0);
        assert!((days_until(now + chrono::Duration::hours(36), now) - 1.5).abs() < 1e-9);
    }
}
