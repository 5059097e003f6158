//! # Ingest
//!
//! Turns an uploaded sheet export into validated candidate records.
//!
//! Uploads are spreadsheet workbooks (first sheet, header row first) or JSON arrays
//! of row objects keyed by the sheet's header cells. Rows that fail validation are
//! counted and skipped, never reported as errors.

use crate::error::{Result, SyncError};
use crate::model::PatientRecord;
use calamine::{Data, Range, Reader};
use hashbrown::HashMap;
use serde_json::Value;
use std::path::Path;

pub const HEADER_NAME: &str = "이름";
pub const HEADER_PHONE: &str = "전화번호";
pub const HEADER_CHART: &str = "차트번호";
pub const HEADER_NATIONAL_ID: &str = "주민등록번호";
pub const HEADER_ADDRESS: &str = "주소";
pub const HEADER_MEMO: &str = "메모";

/// Longest accepted value for free-text cells.
pub const MAX_FIELD_CHARS: usize = 255;

/// One raw sheet row, cell text keyed by header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    cells: HashMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, header: &str, value: &str) -> Self {
        self.cells.insert(header.to_string(), value.to_string());
        self
    }

    /// Cell text, `None` when the cell is missing or empty.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .get(header)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .map(|(header, value)| (header.as_str(), value.as_str()))
    }
}

/// Reads an uploaded file into ordered raw rows.
pub trait RowParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<RawRow>>;
}

/// Parser for JSON row-array exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowParser;

impl RowParser for JsonRowParser {
    fn parse(&self, path: &Path) -> Result<Vec<RawRow>> {
        if !path.exists() {
            return Err(SyncError::parse(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SyncError::parse(format!("cannot read {}: {err}", path.display())))?;
        let rows: Vec<serde_json::Map<String, Value>> = serde_json::from_str(&raw)
            .map_err(|err| SyncError::parse(format!("{}: {err}", path.display())))?;
        if rows.is_empty() {
            return Err(SyncError::parse(format!(
                "no data rows in {}",
                path.display()
            )));
        }

        Ok(rows
            .into_iter()
            .map(|row| RawRow {
                cells: row
                    .into_iter()
                    .filter_map(|(header, value)| cell_text(value).map(|text| (header, text)))
                    .collect(),
            })
            .collect())
    }
}

fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Parser for spreadsheet workbooks (xlsx, xlsm, xls, ods). Reads the first sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxRowParser;

impl RowParser for XlsxRowParser {
    fn parse(&self, path: &Path) -> Result<Vec<RawRow>> {
        if !path.exists() {
            return Err(SyncError::parse(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let mut workbook = calamine::open_workbook_auto(path)
            .map_err(|err| SyncError::parse(format!("{}: {err}", path.display())))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SyncError::parse(format!("no worksheet in {}", path.display())))?
            .map_err(|err| SyncError::parse(format!("{}: {err}", path.display())))?;

        let rows = rows_from_range(&range);
        if rows.is_empty() {
            return Err(SyncError::parse(format!(
                "no data rows in {}",
                path.display()
            )));
        }
        Ok(rows)
    }
}

/// First row is the header; blank rows are dropped.
fn rows_from_range(range: &Range<Data>) -> Vec<RawRow> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<Option<String>> = header
        .iter()
        .map(|cell| sheet_cell_text(cell).map(|text| text.trim().to_string()))
        .collect();

    rows.map(|cells| RawRow {
        cells: headers
            .iter()
            .zip(cells)
            .filter_map(|(header, cell)| Some((header.clone()?, sheet_cell_text(cell)?)))
            .collect(),
    })
    .filter(|row| !row.cells.is_empty())
    .collect()
}

fn sheet_cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(text) if text.is_empty() => None,
        Data::String(text) => Some(text.clone()),
        // Whole numbers (chart numbers typed as numbers) lose the trailing ".0".
        Data::Float(value) if value.fract() == 0.0 => Some(format!("{value:.0}")),
        other => Some(other.to_string()),
    }
}

/// Picks a parser from the upload's extension: workbooks go to [`XlsxRowParser`],
/// everything else to [`JsonRowParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadRowParser;

impl RowParser for UploadRowParser {
    fn parse(&self, path: &Path) -> Result<Vec<RawRow>> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("xlsx" | "xlsm" | "xls" | "ods") => XlsxRowParser.parse(path),
            _ => JsonRowParser.parse(path),
        }
    }
}

/// Valid records plus the number of rows rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedBatch {
    pub records: Vec<PatientRecord>,
    pub skipped: usize,
}

/// Validate rows and convert the survivors into candidate records.
///
/// Phones are stored digits-only; `row_num` counts the header as row 1.
pub fn validate_rows(rows: &[RawRow], file_name: &str) -> ValidatedBatch {
    let mut batch = ValidatedBatch::default();
    for (index, row) in rows.iter().enumerate() {
        if !is_valid_row(row) {
            batch.skipped += 1;
            continue;
        }
        let text = |header| row.get(header).unwrap_or_default().to_string();
        batch.records.push(PatientRecord {
            name: text(HEADER_NAME),
            phone: text(HEADER_PHONE).replace('-', ""),
            chart: text(HEADER_CHART),
            national_id: text(HEADER_NATIONAL_ID),
            address: text(HEADER_ADDRESS),
            memo: text(HEADER_MEMO),
            row_num: u32::try_from(index + 2).unwrap_or(u32::MAX),
            file_name: file_name.to_string(),
        });
    }
    batch
}

fn is_valid_row(row: &RawRow) -> bool {
    let Some(name) = row.get(HEADER_NAME) else {
        return false;
    };
    if name.trim().is_empty() || name.chars().count() > MAX_FIELD_CHARS {
        return false;
    }
    if !row.get(HEADER_PHONE).is_some_and(is_valid_phone) {
        return false;
    }
    let within_limit = |header| {
        row.get(header)
            .map_or(true, |value| value.chars().count() <= MAX_FIELD_CHARS)
    };
    if !(within_limit(HEADER_CHART) && within_limit(HEADER_ADDRESS) && within_limit(HEADER_MEMO)) {
        return false;
    }
    row.get(HEADER_NATIONAL_ID).map_or(true, is_valid_national_id)
}

/// `010` mobile numbers, either `01012345678` or `010-1234-5678`.
pub fn is_valid_phone(phone: &str) -> bool {
    let bytes = phone.as_bytes();
    match bytes.len() {
        11 => phone.starts_with("010") && all_digits(&bytes[3..]),
        13 => {
            phone.starts_with("010-")
                && bytes[8] == b'-'
                && all_digits(&bytes[4..8])
                && all_digits(&bytes[9..])
        }
        _ => false,
    }
}

/// Birth-date prefix, optionally followed by the gender digit and masked remainder:
/// `900101`, `9001011`, `900101-1`, `900101-1234567`, `900101-1******`.
pub fn is_valid_national_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    match bytes.len() {
        6 | 7 => all_digits(bytes),
        8 => all_digits(&bytes[..6]) && bytes[6] == b'-' && bytes[7].is_ascii_digit(),
        n if n >= 9 => {
            all_digits(&bytes[..6])
                && bytes[6] == b'-'
                && bytes[7].is_ascii_digit()
                && bytes[8..].iter().all(|b| b.is_ascii_digit() || *b == b'*')
        }
        _ => false,
    }
}

fn all_digits(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_digit)
}
