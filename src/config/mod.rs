//! Unified configuration for the patient-sync worker and admin tools.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (patient-sync.toml)
//! ```toml
//! [database]
//! patients_path = "/var/lib/patient-sync/patients.sqlite"
//! jobs_path = "/var/lib/patient-sync/jobs.sqlite"
//!
//! [worker]
//! poll_interval_secs = 5
//! requeue_stranded_on_start = false
//!
//! [cache]
//! warm_on_start = true
//! ```
//!
//! Environment variables use the `PATIENT_SYNC_` prefix with `__` between sections,
//! e.g. `PATIENT_SYNC_WORKER__POLL_INTERVAL_SECS=2`.

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for patient-sync components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite database locations
    pub database: DatabaseConfig,
    /// Job polling behaviour
    pub worker: WorkerConfig,
    /// Canonical cache startup behaviour
    pub cache: CacheConfig,
    /// Diff application tuning
    pub persistence: PersistenceConfig,
    /// Upload staging
    pub uploads: UploadConfig,
    /// Tracing output
    pub log: LogConfig,
}

impl SyncConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(SyncConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("PATIENT_SYNC_").split("__"));
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Patient table database file
    pub patients_path: PathBuf,
    /// Job queue database file
    pub jobs_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            patients_path: PathBuf::from(DEFAULT_PATIENTS_DB),
            jobs_path: PathBuf::from(DEFAULT_JOBS_DB),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Backoff when the queue has no pending job (seconds)
    pub poll_interval_secs: u64,
    /// Move jobs left in `processing` back to `pending` at startup
    pub requeue_stranded_on_start: bool,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            requeue_stranded_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Rebuild the canonical cache from persisted rows at startup
    pub warm_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Rows per insert statement
    pub insert_chunk_rows: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            insert_chunk_rows: DEFAULT_INSERT_CHUNK_ROWS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory submitted files are copied into
    pub dir: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patients_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue_stranded_on_start: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
