//! # Worker
//!
//! Single consumer draining the job queue. One job runs at a time on tokio's blocking
//! pool; between jobs the loop either claims the next one immediately or backs off for
//! the poll interval. Job failures are recorded on the job and never stop the loop.

use crate::error::{Result, SyncError};
use crate::jobs::JobQueue;
use crate::model::{Job, JobId, JobStatus};
use crate::PatientSync;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct Worker {
    queue: Arc<JobQueue>,
    pipeline: Arc<PatientSync>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, pipeline: Arc<PatientSync>, poll_interval: Duration) -> Self {
        Self {
            queue,
            pipeline,
            poll_interval,
        }
    }

    /// Claim and run at most one job. Returns `None` when nothing was pending.
    ///
    /// Only queue errors surface here; pipeline errors become a `failed` job.
    pub async fn run_once(&self) -> Result<Option<(JobId, JobStatus)>> {
        let queue = self.queue.clone();
        let claimed = tokio::task::spawn_blocking(move || queue.claim_next())
            .await
            .map_err(|err| SyncError::Worker(err.to_string()))??;
        let Some(job) = claimed else {
            return Ok(None);
        };

        let status = self.execute(job.clone()).await;
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || queue.set_status(job.id, status))
            .await
            .map_err(|err| SyncError::Worker(err.to_string()))??;
        Ok(Some((job.id, status)))
    }

    async fn execute(&self, job: Job) -> JobStatus {
        info!(job = %job.id, file = %job.file_path.display(), "processing job");
        let pipeline = self.pipeline.clone();
        let path = job.file_path.clone();
        let original_name = job.original_name.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            pipeline.process_upload_as(&path, original_name.as_deref())
        })
        .await
        .map_err(|err| SyncError::Worker(err.to_string()))
        .and_then(|result| result);

        match outcome {
            Ok(summary) => {
                info!(
                    job = %job.id,
                    total = summary.total_rows,
                    processed = summary.processed_rows,
                    skipped = summary.skipped_rows,
                    "job completed"
                );
                JobStatus::Completed
            }
            Err(err) => {
                error!(job = %job.id, error = %err, "job failed");
                JobStatus::Failed
            }
        }
    }

    /// Drain the queue until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A job already claimed when shutdown arrives runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Some((id, status))) => {
                    debug!(job = %id, %status, "job finished");
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    warn!(error = %err, "job queue unavailable; backing off");
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CanonicalCache;
    use crate::gateway::SqliteGateway;
    use crate::ingest::{RawRow, HEADER_NAME, HEADER_PHONE};
    use crate::test_support::write_upload;

    fn worker(queue: Arc<JobQueue>) -> Worker {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let pipeline = PatientSync::new(Arc::new(CanonicalCache::new()), Arc::new(gateway));
        Worker::new(queue, Arc::new(pipeline), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_run_once_on_empty_queue() {
        let queue = Arc::new(JobQueue::open_in_memory().unwrap());
        assert!(worker(queue).run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_once_completes_and_fails_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_upload(
            dir.path(),
            "good.json",
            &[RawRow::new()
                .with(HEADER_NAME, "Park")
                .with(HEADER_PHONE, "01011112222")],
        )
        .unwrap();
        let missing = dir.path().join("missing.json");

        let queue = Arc::new(JobQueue::open_in_memory().unwrap());
        let first = queue.enqueue(&missing).unwrap();
        let second = queue.enqueue(&good).unwrap();
        let worker = worker(queue.clone());

        assert_eq!(
            worker.run_once().await.unwrap(),
            Some((first, JobStatus::Failed))
        );
        assert_eq!(
            worker.run_once().await.unwrap(),
            Some((second, JobStatus::Completed))
        );
        assert!(!good.exists());
        assert_eq!(queue.get(second).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(JobQueue::open_in_memory().unwrap());
        let worker = worker(queue);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
