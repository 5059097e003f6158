//! Default constants for patient-sync configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Storage Defaults (SQLite)
// =============================================================================

/// Default patient database file
pub const DEFAULT_PATIENTS_DB: &str = "patients.sqlite";

/// Default job queue database file
pub const DEFAULT_JOBS_DB: &str = "jobs.sqlite";

/// Default directory uploads are staged into before a job picks them up
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";

/// Maximum rows per multi-row insert statement (8 bound parameters per row).
/// Updates and deletes run one prepared statement per row, so they are not chunked.
pub const DEFAULT_INSERT_CHUNK_ROWS: usize = 1000;

// =============================================================================
// Worker Defaults
// =============================================================================

/// Idle backoff between polls when no pending job exists (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

// =============================================================================
// Logging Defaults
// =============================================================================

/// Default tracing filter directive, overridden by `RUST_LOG` when set
pub const DEFAULT_LOG_FILTER: &str = "info";
