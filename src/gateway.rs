//! # Persistence Gateway
//!
//! Applies reconciliation diffs to durable storage and serves paged patient queries.
//! [`SqliteGateway`] is the shipped implementation; the trait is the seam the
//! pipeline is written against.

use crate::error::{Result, SyncError};
use crate::model::{PatientPage, PatientQuery, PatientRecord, StoredPatient, TrackedField};
use crate::reconcile::DiffSets;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Upper bound on rows per multi-row insert statement.
pub const DEFAULT_CHUNK_ROWS: usize = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS patient (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    phone TEXT NOT NULL,
    chart TEXT NOT NULL DEFAULT '',
    rrm TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    memo TEXT NOT NULL DEFAULT '',
    rowNum INTEGER NOT NULL DEFAULT 0,
    fileName TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_patient_identity ON patient (name, phone, chart);
";

const PATIENT_COLUMNS: &str = "id, name, phone, chart, rrm, address, memo, rowNum, fileName";

/// Durable storage for reconciled patients.
pub trait PersistenceGateway: Send + Sync {
    /// Batched conditional update of the tracked fields, keyed by `(name, phone, chart)`.
    fn update_patients(&self, records: &[PatientRecord]) -> Result<()>;

    /// Chunked insert of new rows.
    fn insert_patients(&self, records: &[PatientRecord]) -> Result<()>;

    /// Remove the chart-less rows for each record's `(name, phone)`.
    fn delete_patients(&self, records: &[PatientRecord]) -> Result<()>;

    fn find_patients(&self, query: &PatientQuery) -> Result<PatientPage>;

    /// Every persisted row, oldest first.
    fn all_patients(&self) -> Result<Vec<StoredPatient>>;

    /// Apply a diff as update, insert, delete. The first failure aborts the rest.
    fn apply(&self, diff: &DiffSets) -> Result<()> {
        self.update_patients(diff.to_update())?;
        self.insert_patients(diff.to_insert())?;
        self.delete_patients(diff.to_delete())?;
        Ok(())
    }
}

/// SQLite-backed gateway over the `patient` table.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    chunk_rows: usize,
}

impl SqliteGateway {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(SyncError::Persistence)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(SyncError::Persistence)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(SyncError::Persistence)?;
        Ok(Self {
            conn: Mutex::new(conn),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        })
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    /// One prepared statement per record. Each tracked field is only overwritten
    /// when the incoming value is non-empty.
    fn update_rows(&self, records: &[PatientRecord]) -> rusqlite::Result<usize> {
        let assignments: Vec<String> = TrackedField::ALL
            .iter()
            .enumerate()
            .map(|(offset, field)| {
                let column = field.column();
                let param = offset + 4;
                format!("{column} = CASE WHEN ?{param} = '' THEN {column} ELSE ?{param} END")
            })
            .collect();
        let sql = format!(
            "UPDATE patient SET {} WHERE name = ?1 AND phone = ?2 AND chart = ?3",
            assignments.join(", ")
        );

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for record in records {
                changed += stmt.execute(params![
                    record.name,
                    record.phone,
                    record.chart,
                    TrackedField::NationalId.value(record),
                    TrackedField::Address.value(record),
                    TrackedField::Memo.value(record),
                ])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn insert_rows(&self, records: &[PatientRecord]) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for chunk in records.chunks(self.chunk_rows) {
            let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()];
            let sql = format!(
                "INSERT INTO patient (name, phone, chart, rrm, address, memo, rowNum, fileName) VALUES {}",
                placeholders.join(", ")
            );
            let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * 8);
            for record in chunk {
                params.push(record.name.clone().into());
                params.push(record.phone.clone().into());
                params.push(record.chart.clone().into());
                params.push(record.national_id.clone().into());
                params.push(record.address.clone().into());
                params.push(record.memo.clone().into());
                params.push(Value::Integer(i64::from(record.row_num)));
                params.push(record.file_name.clone().into());
            }
            tx.execute(&sql, params_from_iter(params))?;
        }
        tx.commit()
    }

    fn delete_rows(&self, records: &[PatientRecord]) -> rusqlite::Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM patient WHERE name = ?1 AND phone = ?2 AND chart = ''",
            )?;
            for record in records {
                removed += stmt.execute(params![record.name, record.phone])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn query_page(&self, query: &PatientQuery) -> rusqlite::Result<PatientPage> {
        let page = query.page.max(1);
        let limit = query.limit.max(1);

        let mut filters = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let needles = [
            ("name", query.name.clone()),
            ("phone", query.phone_digits()),
            ("chart", query.chart.clone()),
        ];
        for (column, needle) in needles {
            if let Some(needle) = needle.filter(|needle| !needle.is_empty()) {
                // instr() keeps matching case-sensitive, unlike LIKE.
                filters.push(format!("instr({column}, ?) > 0"));
                params.push(needle.into());
            }
        }
        let where_clause = if filters.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", filters.join(" AND "))
        };

        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM patient {where_clause}"),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        let offset = i64::from(page - 1) * i64::from(limit);
        params.push(Value::Integer(i64::from(limit)));
        params.push(Value::Integer(offset));
        let mut stmt = conn.prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient {where_clause} ORDER BY id DESC LIMIT ? OFFSET ?"
        ))?;
        let data = stmt
            .query_map(params_from_iter(params.iter()), row_to_patient)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(PatientPage {
            total: u64::try_from(total).unwrap_or_default(),
            page,
            count: data.len(),
            data,
        })
    }

    fn all_rows(&self) -> rusqlite::Result<Vec<StoredPatient>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map([], row_to_patient)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl PersistenceGateway for SqliteGateway {
    #[instrument(level = "debug", skip_all, fields(rows = records.len()))]
    fn update_patients(&self, records: &[PatientRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        info!("Updating {} patients", records.len());
        let changed = self.update_rows(records).map_err(SyncError::Persistence)?;
        debug!(changed, "patient rows updated");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(rows = records.len()))]
    fn insert_patients(&self, records: &[PatientRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        info!("Inserting {} patients", records.len());
        self.insert_rows(records).map_err(SyncError::Persistence)
    }

    #[instrument(level = "debug", skip_all, fields(rows = records.len()))]
    fn delete_patients(&self, records: &[PatientRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        info!("Deleting {} patients", records.len());
        let removed = self.delete_rows(records).map_err(SyncError::Persistence)?;
        debug!(removed, "chart-less rows removed");
        Ok(())
    }

    fn find_patients(&self, query: &PatientQuery) -> Result<PatientPage> {
        self.query_page(query).map_err(SyncError::Persistence)
    }

    fn all_patients(&self) -> Result<Vec<StoredPatient>> {
        self.all_rows().map_err(SyncError::Persistence)
    }
}

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<StoredPatient> {
    Ok(StoredPatient {
        id: row.get(0)?,
        record: PatientRecord {
            name: row.get(1)?,
            phone: row.get(2)?,
            chart: row.get(3)?,
            national_id: row.get(4)?,
            address: row.get(5)?,
            memo: row.get(6)?,
            row_num: row.get(7)?,
            file_name: row.get(8)?,
        },
    })
}
