//! Error types shared by the pipeline, gateway and job queue.

use crate::config::ConfigError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Upload missing, unreadable, malformed, or without data rows. Fatal to the job.
    #[error("parse error: {0}")]
    Parse(String),

    /// A diff statement failed; the remaining diff for the job is abandoned.
    #[error("persistence error: {0}")]
    Persistence(#[source] rusqlite::Error),

    #[error("job queue error: {0}")]
    Queue(#[source] rusqlite::Error),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The blocking task running a job panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl SyncError {
    pub fn parse(message: impl Into<String>) -> Self {
        SyncError::Parse(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}
