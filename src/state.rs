//! Application state management

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::ids::IdGenerator;
use crate::retention::{ExpirationSweeper, RetentionCalculator, RetentionError, RetentionPolicy};
use crate::upload::{ChunkStore, Finalizer, UploadService};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid retention policy: {0}")]
    Retention(#[from] RetentionError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    catalog: Arc<dyn Catalog>,
    retention: RetentionCalculator,
    uploads: UploadService,
}

impl AppState {
    /// Wire the upload and retention services around one catalog
    pub fn new(config: Config, catalog: Arc<dyn Catalog>) -> Result<Self, StateError> {
        let retention = RetentionCalculator::new(RetentionPolicy::from_config(&config.retention)?);

        let finalizer = Finalizer::new(
            Arc::clone(&catalog),
            retention,
            IdGenerator::new(config.upload.token_length, config.upload.id_max_attempts),
            config.storage.root.clone(),
            config.server.base_url.clone(),
        );

        let uploads = UploadService::new(
            config.upload.clone(),
            ChunkStore::new(config.storage.chunk_dir.clone()),
            Arc::clone(&catalog),
            finalizer,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                catalog,
                retention,
                uploads,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the resource catalog
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.inner.catalog
    }

    pub fn retention(&self) -> &RetentionCalculator {
        &self.inner.retention
    }

    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }

    /// A sweeper over this state's storage root, also reclaiming sessions
    pub fn sweeper(&self) -> ExpirationSweeper {
        let retention = &self.inner.config.retention;
        ExpirationSweeper::new(
            Arc::clone(&self.inner.catalog),
            self.inner.retention,
            self.inner.config.storage.root.clone(),
        )
        .with_enabled(retention.enabled)
        .with_interval(Duration::from_secs(retention.sweep_interval_secs))
        .with_upload_reclaim(self.inner.uploads.clone())
    }
}
