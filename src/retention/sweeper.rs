//! Expiration Sweeper
//!
//! Background task that evicts expired resources from the storage root and
//! reconciles catalog records whose files disappeared. Runs once at startup
//! and then on a fixed interval until cancelled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::RetentionCalculator;
use crate::catalog::{Catalog, CatalogError, ResourceRecord};
use crate::upload::UploadService;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Untracked files younger than this are left alone; an upload writes its
/// file before its record.
const UNTRACKED_GRACE: Duration = Duration::from_secs(5 * 60);

/// Counters for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired_removed: usize,
    pub untracked_removed: usize,
    pub orphans_reconciled: usize,
    pub sessions_reclaimed: usize,
    pub errors: usize,
}

#[derive(Debug, thiserror::Error)]
enum SweepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

enum FileOutcome {
    Kept,
    Expired,
    Untracked,
}

/// Periodic retention enforcement
pub struct ExpirationSweeper {
    catalog: Arc<dyn Catalog>,
    retention: RetentionCalculator,
    storage_root: PathBuf,
    enabled: bool,
    interval: Duration,
    uploads: Option<UploadService>,
}

impl ExpirationSweeper {
    pub fn new(catalog: Arc<dyn Catalog>, retention: RetentionCalculator, storage_root: PathBuf) -> Self {
        Self {
            catalog,
            retention,
            storage_root,
            enabled: true,
            interval: DEFAULT_INTERVAL,
            uploads: None,
        }
    }

    /// When disabled, passes are no-ops
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Also reclaim abandoned upload sessions on every tick
    pub fn with_upload_reclaim(mut self, uploads: UploadService) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Run on a background task until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Sweep immediately, then every interval; missed ticks are skipped
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            enabled = self.enabled,
            "Starting expiration sweeper"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.run_once() => {}
                    }
                }
            }
        }

        tracing::info!("Expiration sweeper stopped");
    }

    /// One tick: session reclamation followed by a sweep
    pub async fn run_once(&self) -> SweepReport {
        let sessions_reclaimed = match &self.uploads {
            Some(uploads) => uploads.reclaim_abandoned().await,
            None => 0,
        };

        let mut report = self.sweep().await;
        report.sessions_reclaimed = sessions_reclaimed;

        tracing::info!(
            scanned = report.scanned,
            expired_removed = report.expired_removed,
            untracked_removed = report.untracked_removed,
            orphans_reconciled = report.orphans_reconciled,
            sessions_reclaimed = report.sessions_reclaimed,
            errors = report.errors,
            "Sweep complete"
        );

        report
    }

    /// Evict expired and untracked files, then reconcile orphan records
    ///
    /// Failures are per entry: logged, counted and retried next pass.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if !self.enabled {
            tracing::debug!("Retention disabled, skipping sweep");
            return report;
        }

        let now = Utc::now();

        let files = match list_files(&self.storage_root).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to scan storage root");
                report.errors += 1;
                Vec::new()
            }
        };

        for (id, modified) in files {
            report.scanned += 1;
            match self.sweep_file(&id, modified, now).await {
                Ok(FileOutcome::Kept) => {}
                Ok(FileOutcome::Expired) => report.expired_removed += 1,
                Ok(FileOutcome::Untracked) => report.untracked_removed += 1,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Failed to sweep file");
                    report.errors += 1;
                }
            }
        }

        self.reconcile(now, &mut report).await;

        report
    }

    async fn sweep_file(
        &self,
        id: &str,
        modified: SystemTime,
        now: DateTime<Utc>,
    ) -> Result<FileOutcome, SweepError> {
        let path = self.storage_root.join(id);

        let Some(record) = self.catalog.get_by_id(id).await? else {
            let age = SystemTime::now().duration_since(modified).unwrap_or_default();
            if age < UNTRACKED_GRACE {
                return Ok(FileOutcome::Kept);
            }
            remove_file(&path).await?;
            tracing::info!(id = %id, "Removed untracked file");
            return Ok(FileOutcome::Untracked);
        };

        if !self.is_expired(&record, modified, now) {
            return Ok(FileOutcome::Kept);
        }

        // The record goes only once the file is confirmed gone
        remove_file(&path).await?;
        self.catalog.delete(id).await?;

        tracing::info!(
            id = %id,
            size = record.size,
            original_name = %record.original_name,
            "Evicted expired resource"
        );
        Ok(FileOutcome::Expired)
    }

    fn is_expired(&self, record: &ResourceRecord, modified: SystemTime, now: DateTime<Utc>) -> bool {
        if self.retention.check_expired(record, now) {
            return true;
        }
        // Records without an explicit expiry fall back to the file's own age
        record.expires_at.is_none()
            && now > self.retention.expiration_from(record.size, DateTime::<Utc>::from(modified))
    }

    async fn reconcile(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let records = match self.catalog.list_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list catalog for reconciliation");
                report.errors += 1;
                return;
            }
        };

        for record in records {
            let result = if record.has_backing_file() {
                self.reconcile_file_record(&record).await
            } else {
                self.reconcile_link_record(&record, now).await
            };

            match result {
                Ok(ReconcileOutcome::Kept) => {}
                Ok(ReconcileOutcome::Orphan) => report.orphans_reconciled += 1,
                Ok(ReconcileOutcome::Expired) => report.expired_removed += 1,
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "Failed to reconcile record");
                    report.errors += 1;
                }
            }
        }
    }

    async fn reconcile_file_record(&self, record: &ResourceRecord) -> Result<ReconcileOutcome, SweepError> {
        if tokio::fs::try_exists(self.storage_root.join(&record.id)).await? {
            return Ok(ReconcileOutcome::Kept);
        }
        self.catalog.delete(&record.id).await?;
        tracing::info!(id = %record.id, "Removed record for missing file");
        Ok(ReconcileOutcome::Orphan)
    }

    /// Link records have no file; only their expiry matters
    async fn reconcile_link_record(
        &self,
        record: &ResourceRecord,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, SweepError> {
        if !self.retention.check_expired(record, now) {
            return Ok(ReconcileOutcome::Kept);
        }
        self.catalog.delete(&record.id).await?;
        tracing::info!(id = %record.id, kind = %record.kind, "Evicted expired record");
        Ok(ReconcileOutcome::Expired)
    }
}

enum ReconcileOutcome {
    Kept,
    Orphan,
    Expired,
}

// ============================================================================
// Filesystem Helpers
// ============================================================================

/// Regular files under `root` as (relative path, modification time)
async fn list_files(root: &Path) -> std::io::Result<Vec<(String, SystemTime)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Some(relative) = relative_id(root, &path) else {
                continue;
            };
            let modified = entry.metadata().await?.modified()?;
            files.push((relative, modified));
        }
    }

    Ok(files)
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Tests
// ============================================================================
