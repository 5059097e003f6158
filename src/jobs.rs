//! # Job Queue
//!
//! Durable FIFO of upload processing requests in the `jobs` table.
//!
//! Status moves `pending -> processing -> completed | failed`. Claiming selects the
//! oldest pending job and marks it `processing` inside one immediate transaction, so
//! two consumers cannot claim the same job. Nothing moves a job out of `processing`
//! automatically; [`JobQueue::requeue_stranded`] is the explicit recovery path.

use crate::error::{Result, SyncError};
use crate::model::{Job, JobId, JobStatus};
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filePath TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    createdAt INTEGER NOT NULL,
    originalName TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status, id);
";

const JOB_COLUMNS: &str = "id, filePath, status, createdAt, originalName";

pub struct JobQueue {
    conn: Mutex<Connection>,
}

impl JobQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(SyncError::Queue)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(SyncError::Queue)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(SyncError::Queue)?;
        info!("Job database and table initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a pending job for `file_path` and return its id.
    pub fn enqueue(&self, file_path: impl AsRef<Path>) -> Result<JobId> {
        self.enqueue_named(file_path, None)
    }

    /// Like [`JobQueue::enqueue`], remembering the name the file was submitted under.
    pub fn enqueue_named(
        &self,
        file_path: impl AsRef<Path>,
        original_name: Option<&str>,
    ) -> Result<JobId> {
        let file_path = file_path.as_ref();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO jobs (filePath, status, createdAt, originalName) VALUES (?1, ?2, ?3, ?4)",
            params![
                file_path.to_string_lossy(),
                JobStatus::Pending.as_str(),
                OffsetDateTime::now_utc().unix_timestamp(),
                original_name
            ],
        )
        .map_err(SyncError::Queue)?;
        let id = JobId(conn.last_insert_rowid());
        info!(job = %id, file = %file_path.display(), "New job added");
        Ok(id)
    }

    /// Copy `source` into `upload_dir` under a random name and enqueue the copy.
    ///
    /// The worker deletes the staged copy once the job finishes, never the source.
    /// The source's file name is kept on the job as its `original_name`.
    pub fn submit_file(&self, source: &Path, upload_dir: &Path) -> Result<JobId> {
        let staged = stage_upload(source, upload_dir)?;
        let original_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        self.enqueue_named(&staged, original_name.as_deref())
    }

    /// Claim the oldest pending job, marking it `processing`.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        self.claim_inner().map_err(SyncError::Queue)
    }

    fn claim_inner(&self) -> rusqlite::Result<Option<Job>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' ORDER BY id ASC LIMIT 1"
                ),
                [],
                row_to_job,
            )
            .optional()?;
        let job = match job {
            Some(mut job) => {
                tx.execute(
                    "UPDATE jobs SET status = ?1 WHERE id = ?2",
                    params![JobStatus::Processing.as_str(), job.id.0],
                )?;
                job.status = JobStatus::Processing;
                Some(job)
            }
            None => None,
        };
        tx.commit()?;
        Ok(job)
    }

    pub fn set_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let updated = self
            .conn
            .lock()
            .execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.0],
            )
            .map_err(SyncError::Queue)?;
        if updated == 0 {
            warn!(job = %id, "status update matched no job");
        }
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.conn
            .lock()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id.0],
                row_to_job,
            )
            .optional()
            .map_err(SyncError::Queue)
    }

    /// Jobs in submission order, optionally filtered by status.
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.list_inner(status).map_err(SyncError::Queue)
    }

    fn list_inner(&self, status: Option<JobStatus>) -> rusqlite::Result<Vec<Job>> {
        let conn = self.conn.lock();
        let jobs = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id ASC"
                ))?;
                let rows = stmt
                    .query_map([status.as_str()], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id ASC"))?;
                let rows = stmt
                    .query_map([], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(jobs)
    }

    /// Move every `processing` job back to `pending`. Returns how many moved.
    ///
    /// Only safe while no worker is running: a live worker's current job would be
    /// claimed a second time.
    pub fn requeue_stranded(&self) -> Result<usize> {
        let moved = self
            .conn
            .lock()
            .execute(
                "UPDATE jobs SET status = ?1 WHERE status = ?2",
                params![JobStatus::Pending.as_str(), JobStatus::Processing.as_str()],
            )
            .map_err(SyncError::Queue)?;
        if moved > 0 {
            warn!(moved, "requeued jobs stranded in processing");
        }
        Ok(moved)
    }
}

/// Copy `source` into `upload_dir` under a random hex name, keeping its extension.
pub fn stage_upload(source: &Path, upload_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(upload_dir).map_err(|err| SyncError::io(upload_dir, err))?;
    let staged = staged_path(source, upload_dir);
    std::fs::copy(source, &staged).map_err(|err| SyncError::io(source, err))?;
    Ok(staged)
}

fn staged_path(source: &Path, upload_dir: &Path) -> PathBuf {
    let mut rng = rand::rng();
    let stem: String = (0..32)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect();
    let name = match source.extension() {
        Some(ext) => format!("{stem}.{}", ext.to_string_lossy()),
        None => stem,
    };
    upload_dir.join(name)
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let path: String = row.get(1)?;
    let status: String = row.get(2)?;
    let created_at: i64 = row.get(3)?;
    let original_name: Option<String> = row.get(4)?;
    Ok(Job {
        id: JobId(row.get(0)?),
        file_path: PathBuf::from(path),
        status: status.parse().map_err(|err: String| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                err.into(),
            )
        })?,
        created_at: OffsetDateTime::from_unix_timestamp(created_at).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                Box::new(err),
            )
        })?,
        original_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_in_submission_order() {
        let queue = JobQueue::open_in_memory().unwrap();
        let ids: Vec<_> = ["a.json", "b.json", "c.json"]
            .iter()
            .map(|path| queue.enqueue(path).unwrap())
            .collect();

        for expected in &ids {
            let job = queue.claim_next().unwrap().unwrap();
            assert_eq!(job.id, *expected);
            assert_eq!(job.status, JobStatus::Processing);
            assert_eq!(
                queue.get(job.id).unwrap().unwrap().status,
                JobStatus::Processing
            );
        }
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_terminal_jobs_are_not_reclaimed() {
        let queue = JobQueue::open_in_memory().unwrap();
        let id = queue.enqueue("a.json").unwrap();
        let job = queue.claim_next().unwrap().unwrap();
        queue.set_status(job.id, JobStatus::Failed).unwrap();

        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(queue.get(id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_requeue_stranded_only_touches_processing() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue("a.json").unwrap();
        queue.enqueue("b.json").unwrap();
        queue.enqueue("c.json").unwrap();
        let first = queue.claim_next().unwrap().unwrap();
        queue.set_status(first.id, JobStatus::Completed).unwrap();
        queue.claim_next().unwrap().unwrap();

        assert_eq!(queue.requeue_stranded().unwrap(), 1);
        assert_eq!(queue.list(Some(JobStatus::Pending)).unwrap().len(), 2);
        assert_eq!(queue.list(Some(JobStatus::Completed)).unwrap().len(), 1);
        assert_eq!(queue.list(None).unwrap().len(), 3);
    }

    #[test]
    fn test_submit_file_stages_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("patients.json");
        std::fs::write(&source, "[]").unwrap();
        let uploads = dir.path().join("uploads");

        let queue = JobQueue::open_in_memory().unwrap();
        let id = queue.submit_file(&source, &uploads).unwrap();
        let job = queue.get(id).unwrap().unwrap();

        assert!(source.exists());
        assert!(job.file_path.exists());
        assert!(job.file_path.starts_with(&uploads));
        assert_eq!(job.file_path.extension().unwrap(), "json");
        assert_eq!(job.original_name.as_deref(), Some("patients.json"));
        assert_ne!(job.file_path.file_name().unwrap(), "patients.json");
    }

    #[test]
    fn test_enqueue_without_original_name() {
        let queue = JobQueue::open_in_memory().unwrap();
        let id = queue.enqueue("a.json").unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().original_name, None);
    }
}
