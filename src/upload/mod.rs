//! Resumable Chunked Uploads
//!
//! Implements large file uploads with:
//! - Chunked transfer with resume support (retried chunks are no-ops)
//! - Server-side chunk storage and index-ordered reassembly
//! - MD5 and SHA-256 digests of the assembled file
//!
//! Protocol Flow:
//! 1. Client initiates with filename, total size and optional chunk size
//! 2. Server returns an upload ID and the number of chunks expected
//! 3. Client uploads chunks in any order, retrying any that fail
//! 4. The chunk completing the set assembles the file and returns its URL
//!    and management token

pub mod chunk_store;
pub mod finalizer;
pub mod service;
pub mod session;
pub mod types;

pub use chunk_store::{compute_digest, digest_file, ChunkStore, ContentDigest};
pub use finalizer::{ArtifactInfo, Finalizer};
pub use service::UploadService;
pub use session::SessionManager;
pub use types::*;
