//! # Data Model
//!
//! Core data structures for patient reconciliation: candidate records, the composite
//! identity key, tracked fields, jobs, and the query/summary shapes exposed to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use time::OffsetDateTime;

/// Chart key meaning "no chart assigned yet".
pub const NO_CHART: &str = "";

/// Composite identity key: `name|phone`, exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(name: &str, phone: &str) -> Self {
        Self(format!("{name}|{phone}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A patient contact record, either a validated candidate row or a canonical entry.
///
/// Optional fields use the empty string for "absent", matching how the validator
/// normalizes missing spreadsheet cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub name: String,
    pub phone: String,
    /// Clinic chart number; empty when unknown
    pub chart: String,
    /// National registration number, possibly masked
    #[serde(rename = "rrm")]
    pub national_id: String,
    pub address: String,
    pub memo: String,
    /// Spreadsheet row this record came from (header is row 1)
    pub row_num: u32,
    /// Upload the record came from
    pub file_name: String,
}

impl PatientRecord {
    /// Create a record with only the required fields set.
    pub fn new(name: impl Into<String>, phone: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            chart: chart.into(),
            national_id: String::new(),
            address: String::new(),
            memo: String::new(),
            row_num: 0,
            file_name: String::new(),
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.name, &self.phone)
    }

    pub fn has_chart(&self) -> bool {
        !self.chart.is_empty()
    }

    /// Merge `incoming` on top of `self`.
    ///
    /// Every optional field (chart included) takes the incoming value only when it is
    /// non-empty; provenance always follows the incoming record.
    pub fn merged_with(&self, incoming: &PatientRecord) -> PatientRecord {
        PatientRecord {
            name: prefer(&incoming.name, &self.name),
            phone: prefer(&incoming.phone, &self.phone),
            chart: prefer(&incoming.chart, &self.chart),
            national_id: prefer(&incoming.national_id, &self.national_id),
            address: prefer(&incoming.address, &self.address),
            memo: prefer(&incoming.memo, &self.memo),
            row_num: incoming.row_num,
            file_name: incoming.file_name.clone(),
        }
    }

    /// True when any of the tracked optional fields differ.
    pub fn tracked_fields_differ(&self, other: &PatientRecord) -> bool {
        TrackedField::ALL
            .iter()
            .any(|field| field.value(self) != field.value(other))
    }
}

fn prefer(incoming: &str, existing: &str) -> String {
    if incoming.is_empty() {
        existing.to_string()
    } else {
        incoming.to_string()
    }
}

/// Optional fields compared during reconciliation and written by batched updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedField {
    NationalId,
    Address,
    Memo,
}

impl TrackedField {
    pub const ALL: [TrackedField; 3] = [
        TrackedField::NationalId,
        TrackedField::Address,
        TrackedField::Memo,
    ];

    /// Column name in the `patient` table.
    pub fn column(self) -> &'static str {
        match self {
            TrackedField::NationalId => "rrm",
            TrackedField::Address => "address",
            TrackedField::Memo => "memo",
        }
    }

    pub fn value(self, record: &PatientRecord) -> &str {
        match self {
            TrackedField::NationalId => &record.national_id,
            TrackedField::Address => &record.address,
            TrackedField::Memo => &record.memo,
        }
    }
}

/// A persisted patient row with its storage id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPatient {
    pub id: i64,
    #[serde(flatten)]
    pub record: PatientRecord,
}

/// Result of accepting one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub skipped_rows: usize,
}

impl UploadSummary {
    pub fn new(total_rows: usize, skipped_rows: usize) -> Self {
        Self {
            total_rows,
            processed_rows: total_rows.saturating_sub(skipped_rows),
            skipped_rows,
        }
    }
}

/// Paged patient search. Filters are case-sensitive substring matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientQuery {
    pub page: u32,
    pub limit: u32,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub chart: Option<String>,
}

impl Default for PatientQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            name: None,
            phone: None,
            chart: None,
        }
    }
}

impl PatientQuery {
    /// Phone needle with hyphens removed, since stored phones are digits only.
    pub fn phone_digits(&self) -> Option<String> {
        self.phone.as_deref().map(|phone| phone.replace('-', ""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientPage {
    pub total: u64,
    pub page: u32,
    pub count: usize,
    pub data: Vec<StoredPatient>,
}

/// Monotonic job identifier assigned by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One queued upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub file_path: PathBuf,
    pub status: JobStatus,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    /// Name the upload was submitted under; `file_path` points at the staged copy.
    pub original_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_is_case_sensitive() {
        assert_eq!(IdentityKey::new("Kim", "01011112222").as_str(), "Kim|01011112222");
        assert_ne!(
            IdentityKey::new("kim", "01011112222"),
            IdentityKey::new("Kim", "01011112222")
        );
    }

    #[test]
    fn test_merge_prefers_non_empty_incoming() {
        let mut existing = PatientRecord::new("Kim", "01011112222", "C1");
        existing.memo = "old memo".to_string();
        existing.address = "Seoul".to_string();
        existing.row_num = 2;
        existing.file_name = "a.json".to_string();

        let mut incoming = PatientRecord::new("Kim", "01011112222", "");
        incoming.address = "Busan".to_string();
        incoming.row_num = 7;
        incoming.file_name = "b.json".to_string();

        let merged = existing.merged_with(&incoming);
        assert_eq!(merged.chart, "C1");
        assert_eq!(merged.address, "Busan");
        assert_eq!(merged.memo, "old memo");
        assert_eq!(merged.row_num, 7);
        assert_eq!(merged.file_name, "b.json");
    }

    #[test]
    fn test_tracked_fields_differ() {
        let mut left = PatientRecord::new("Kim", "01011112222", "C1");
        let mut right = left.clone();
        right.row_num = 9;
        assert!(!left.tracked_fields_differ(&right));

        left.national_id = "900101-1".to_string();
        assert!(left.tracked_fields_differ(&right));
    }

    #[test]
    fn test_upload_summary_counts() {
        let summary = UploadSummary::new(10, 3);
        assert_eq!(summary.processed_rows, 7);
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["processedRows"], 7);
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("stuck".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_query_phone_digits() {
        let query = PatientQuery {
            phone: Some("010-1855-6059".to_string()),
            ..PatientQuery::default()
        };
        assert_eq!(query.phone_digits().as_deref(), Some("01018556059"));
    }
}
