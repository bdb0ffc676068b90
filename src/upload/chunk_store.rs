//! Chunk Store
//!
//! Temporary storage for uploaded chunks before assembly. Each session
//! owns one directory holding one file per chunk index.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Local filesystem chunk storage
#[derive(Debug, Clone)]
pub struct ChunkStore {
    base_path: PathBuf,
}

impl ChunkStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join(session_id)
    }

    pub fn chunk_path(&self, session_id: &str, chunk_index: u64) -> PathBuf {
        self.session_dir(session_id).join(chunk_index.to_string())
    }

    /// Create the directory for a new session
    pub async fn create_session_dir(&self, session_id: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.session_dir(session_id)).await
    }

    /// Persist a chunk
    ///
    /// The bytes land under a temporary name and are renamed into place,
    /// so a merge never sees a partially written chunk. Fails if the
    /// session directory is gone.
    pub async fn write_chunk(
        &self,
        session_id: &str,
        chunk_index: u64,
        data: &[u8],
    ) -> std::io::Result<()> {
        let final_path = self.chunk_path(session_id, chunk_index);
        let temp_path = self
            .session_dir(session_id)
            .join(format!("{}.{:08x}.part", chunk_index, rand::random::<u32>()));

        if let Err(e) = write_synced(&temp_path, data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }

    /// Concatenate chunks `0..chunk_count` in index order into `dest`
    ///
    /// Returns the number of bytes written.
    pub async fn merge_into(
        &self,
        session_id: &str,
        chunk_count: u64,
        dest: &Path,
    ) -> std::io::Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut output = tokio::fs::File::create(dest).await?;
        let mut total = 0u64;

        for index in 0..chunk_count {
            let mut chunk = tokio::fs::File::open(self.chunk_path(session_id, index)).await?;
            total += tokio::io::copy(&mut chunk, &mut output).await?;
        }

        output.flush().await?;
        output.sync_all().await?;

        Ok(total)
    }

    /// Delete all chunks for a session
    pub async fn delete_session(&self, session_id: &str) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Session directories currently on disk with their modification time
    pub async fn list_session_dirs(&self) -> std::io::Result<Vec<(String, SystemTime)>> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            dirs.push((name, metadata.modified()?));
        }

        Ok(dirs)
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Hex digests of stored content, both empty when hashing failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDigest {
    pub md5: String,
    pub sha256: String,
}

/// MD5 and SHA-256 fed in lockstep
#[derive(Default)]
struct DigestState {
    md5: Md5,
    sha256: Sha256,
}

impl DigestState {
    fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha256.update(data);
    }

    fn finish(self) -> ContentDigest {
        ContentDigest {
            md5: hex::encode(self.md5.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
        }
    }
}

/// Digest an in-memory buffer
pub fn compute_digest(data: &[u8]) -> ContentDigest {
    let mut state = DigestState::default();
    state.update(data);
    state.finish()
}

/// Digest a file without loading it into memory
pub async fn digest_file(path: &Path) -> std::io::Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut state = DigestState::default();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        state.update(&buffer[..read]);
    }

    Ok(state.finish())
}

// ============================================================================
// Tests
// ============================================================================
