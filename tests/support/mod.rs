use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use patient_sync::{
    CanonicalCache, PatientPage, PatientQuery, PatientRecord, PatientSync, PersistenceGateway,
    SqliteGateway, StoredPatient, SyncError,
};

/// Pipeline over an on-disk patient database in `dir`.
#[allow(dead_code)]
pub fn sqlite_pipeline(dir: &Path) -> anyhow::Result<(Arc<PatientSync>, Arc<SqliteGateway>)> {
    let gateway = Arc::new(SqliteGateway::open(dir.join("patients.sqlite"))?);
    let pipeline = PatientSync::new(Arc::new(CanonicalCache::new()), gateway.clone());
    Ok((Arc::new(pipeline), gateway))
}

/// Every patient row, oldest first.
#[allow(dead_code)]
pub fn stored(gateway: &dyn PersistenceGateway) -> anyhow::Result<Vec<StoredPatient>> {
    Ok(gateway.all_patients()?)
}

/// Gateway whose writes fail while `failing` is set. Reads always succeed.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyGateway {
    pub failing: Mutex<bool>,
    pub inserted: Mutex<Vec<PatientRecord>>,
}

impl FlakyGateway {
    fn check(&self) -> patient_sync::Result<()> {
        if *self.failing.lock() {
            return Err(SyncError::Persistence(rusqlite::Error::ExecuteReturnedResults));
        }
        Ok(())
    }
}

impl PersistenceGateway for FlakyGateway {
    fn update_patients(&self, _records: &[PatientRecord]) -> patient_sync::Result<()> {
        self.check()
    }

    fn insert_patients(&self, records: &[PatientRecord]) -> patient_sync::Result<()> {
        self.check()?;
        self.inserted.lock().extend_from_slice(records);
        Ok(())
    }

    fn delete_patients(&self, _records: &[PatientRecord]) -> patient_sync::Result<()> {
        self.check()
    }

    fn find_patients(&self, query: &PatientQuery) -> patient_sync::Result<PatientPage> {
        Ok(PatientPage {
            total: 0,
            page: query.page,
            count: 0,
            data: Vec::new(),
        })
    }

    fn all_patients(&self) -> patient_sync::Result<Vec<StoredPatient>> {
        Ok(Vec::new())
    }
}
