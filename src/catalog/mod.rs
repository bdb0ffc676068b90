//! Resource Catalog
//!
//! One persisted record per hosted resource, keyed by its public ID.
//! The catalog is shared by the upload paths, the management routes and
//! the expiration sweeper, so every implementation must tolerate
//! concurrent callers.

mod types;

pub use types::*;

use async_trait::async_trait;

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Persistence boundary for resource records
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Insert a record, replacing any record with the same ID
    async fn store(&self, record: &ResourceRecord) -> Result<(), CatalogError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<ResourceRecord>, CatalogError>;

    async fn get_by_token(&self, token: &str) -> Result<Option<ResourceRecord>, CatalogError>;

    /// Delete a record. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, CatalogError>;

    async fn list_all(&self) -> Result<Vec<ResourceRecord>, CatalogError>;

    /// Count and total size, optionally restricted to one kind
    async fn stats(&self, kind: Option<ResourceKind>) -> Result<CatalogStats, CatalogError>;

    /// Bump the access counter of a record
    async fn record_access(&self, id: &str) -> Result<(), CatalogError>;
}
