//! # Patient Sync
//!
//! Reconciles uploaded patient contact spreadsheets against the patient table.
//!
//! Each upload is parsed, validated, pre-merged per identity (name + phone), then diffed
//! against an in-memory canonical cache so that only genuinely new or changed rows reach
//! storage. Uploads are processed one at a time by a worker draining a durable job queue.

pub mod cache;
pub mod charts;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod jobs;
pub mod model;
pub mod premerge;
pub mod reconcile;
pub mod telemetry;
pub mod test_support;
pub mod worker;

// Re-export main types for convenience
pub use cache::{CacheStats, CanonicalCache, Hydration};
pub use charts::{ChartSet, Placement};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use gateway::{PersistenceGateway, SqliteGateway};
pub use ingest::{JsonRowParser, RawRow, RowParser, UploadRowParser, XlsxRowParser};
pub use jobs::JobQueue;
pub use model::{
    IdentityKey, Job, JobId, JobStatus, PatientPage, PatientQuery, PatientRecord, StoredPatient,
    UploadSummary,
};
pub use reconcile::{reconcile, DiffSets};
pub use worker::Worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Main API: the upload pipeline bound to a cache and a store.
pub struct PatientSync {
    cache: Arc<CanonicalCache>,
    gateway: Arc<dyn PersistenceGateway>,
    parser: Box<dyn RowParser>,
}

impl PatientSync {
    /// Create a pipeline reading workbook or JSON uploads, chosen by extension.
    pub fn new(cache: Arc<CanonicalCache>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self::with_parser(cache, gateway, UploadRowParser)
    }

    /// Create a pipeline with a custom row parser.
    pub fn with_parser<P>(
        cache: Arc<CanonicalCache>,
        gateway: Arc<dyn PersistenceGateway>,
        parser: P,
    ) -> Self
    where
        P: RowParser + 'static,
    {
        Self {
            cache,
            gateway,
            parser: Box::new(parser),
        }
    }

    pub fn cache(&self) -> &CanonicalCache {
        &self.cache
    }

    /// Load every persisted patient into the cache. Returns the number of rows loaded.
    ///
    /// Chart-less rows found beside charted rows for the same identity (left behind by
    /// an interrupted diff) are folded into the cache and removed from storage.
    pub fn warm_cache(&self) -> Result<usize> {
        let stored = self.gateway.all_patients()?;
        let hydration = self
            .cache
            .hydrate(stored.into_iter().map(|patient| patient.record));
        if !hydration.repairs.is_empty() {
            warn!(
                updates = hydration.repairs.to_update().len(),
                deletes = hydration.repairs.to_delete().len(),
                "repairing rows that diverge from the canonical cache"
            );
            self.gateway.apply(&hydration.repairs)?;
        }
        let stats = self.cache.stats();
        info!(
            loaded = hydration.loaded,
            identities = stats.identities,
            entries = stats.entries,
            "canonical cache warmed"
        );
        Ok(hydration.loaded)
    }

    /// Run one upload through parse, validate, pre-merge, reconcile and persist.
    ///
    /// The file is removed when this returns, whether or not it succeeded. Cache
    /// changes made before a persistence failure are kept.
    pub fn process_upload(&self, path: &Path) -> Result<UploadSummary> {
        self.process_upload_as(path, None)
    }

    /// [`PatientSync::process_upload`] for a staged copy: records take `file_name`
    /// as their provenance instead of the staged file's own name.
    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub fn process_upload_as(
        &self,
        path: &Path,
        file_name: Option<&str>,
    ) -> Result<UploadSummary> {
        let _cleanup = RemoveOnDrop(path.to_path_buf());

        let stats = self.cache.stats();
        info!(
            identities = stats.identities,
            entries = stats.entries,
            "canonical cache size"
        );

        let rows = self.parser.parse(path)?;
        let file_name = match file_name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let batch = ingest::validate_rows(&rows, &file_name);
        let summary = UploadSummary::new(rows.len(), batch.skipped);

        let merged = premerge::premerge(batch.records);
        info!(
            identities = merged.identity_count(),
            records = merged.record_count(),
            "batch pre-merged"
        );

        let diff = reconcile(&self.cache, merged.into_records());
        self.gateway.apply(&diff)?;

        info!(
            total = summary.total_rows,
            processed = summary.processed_rows,
            skipped = summary.skipped_rows,
            "upload processed"
        );
        Ok(summary)
    }

    /// Stage `source` in `upload_dir` and queue it for the worker.
    pub fn submit_upload(&self, queue: &JobQueue, source: &Path, upload_dir: &Path) -> Result<JobId> {
        if !source.is_file() {
            return Err(SyncError::parse(format!(
                "upload not found: {}",
                source.display()
            )));
        }
        queue.submit_file(source, upload_dir)
    }

    pub fn find_patients(&self, query: &PatientQuery) -> Result<PatientPage> {
        self.gateway.find_patients(query)
    }
}

struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(file = %self.0.display(), error = %err, "failed to remove upload"),
        }
    }
}
