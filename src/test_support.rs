//! Fixtures shared by unit tests, integration tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

use crate::ingest::{
    RawRow, HEADER_ADDRESS, HEADER_CHART, HEADER_MEMO, HEADER_NAME, HEADER_NATIONAL_ID,
    HEADER_PHONE,
};
use crate::model::PatientRecord;

const SURNAMES: [&str; 8] = ["김", "이", "박", "최", "정", "강", "조", "윤"];
const GIVEN: [&str; 8] = ["민준", "서연", "도윤", "지우", "하준", "서윤", "예준", "하은"];
const DISTRICTS: [&str; 5] = ["강남구", "마포구", "서초구", "송파구", "종로구"];

/// Build a candidate record with the given identity and chart.
pub fn patient(name: &str, phone: &str, chart: &str) -> PatientRecord {
    PatientRecord::new(name, phone, chart)
}

/// Generate a seeded candidate batch.
///
/// `repeat_probability` is the chance a row reuses an identity already generated,
/// which exercises the merge and absorption paths. About a third of rows carry no chart.
pub fn generate_candidates(count: usize, repeat_probability: f64, seed: u64) -> Vec<PatientRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut identities: Vec<(String, String)> = Vec::new();
    let mut records = Vec::with_capacity(count);

    for index in 0..count {
        let (name, phone) = if !identities.is_empty() && rng.random_bool(repeat_probability) {
            identities[rng.random_range(0..identities.len())].clone()
        } else {
            let name = format!(
                "{}{}",
                SURNAMES[rng.random_range(0..SURNAMES.len())],
                GIVEN[rng.random_range(0..GIVEN.len())]
            );
            let phone = format!("010{:08}", rng.random_range(0..100_000_000u32));
            identities.push((name.clone(), phone.clone()));
            (name, phone)
        };

        let chart = if rng.random_bool(0.33) {
            String::new()
        } else {
            format!("C{}", rng.random_range(1..=4))
        };

        let mut record = PatientRecord::new(name, phone, chart);
        if rng.random_bool(0.5) {
            record.address = format!("서울시 {}", DISTRICTS[rng.random_range(0..DISTRICTS.len())]);
        }
        if rng.random_bool(0.2) {
            record.memo = format!("memo {}", rng.random_range(0..10));
        }
        record.row_num = u32::try_from(index + 2).unwrap_or(u32::MAX);
        record.file_name = "generated.json".to_string();
        records.push(record);
    }
    records
}

/// Render a record as the sheet row that would produce it.
pub fn raw_row(record: &PatientRecord) -> RawRow {
    RawRow::new()
        .with(HEADER_NAME, &record.name)
        .with(HEADER_PHONE, &record.phone)
        .with(HEADER_CHART, &record.chart)
        .with(HEADER_NATIONAL_ID, &record.national_id)
        .with(HEADER_ADDRESS, &record.address)
        .with(HEADER_MEMO, &record.memo)
}

/// Write rows as a JSON upload named `file_name` under `dir`.
pub fn write_upload(dir: &Path, file_name: &str, rows: &[RawRow]) -> std::io::Result<PathBuf> {
    let array: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::Value::Object(
                row.cells()
                    .map(|(header, value)| (header.to_string(), value.into()))
                    .collect(),
            )
        })
        .collect();
    let path = dir.join(file_name);
    std::fs::write(&path, serde_json::to_vec(&array)?)?;
    Ok(path)
}
