//! # Reconciliation Engine
//!
//! Diffs a pre-merged batch against the canonical cache. The cache is updated as
//! records are processed; the resulting insert/update/delete sets are handed to the
//! persistence gateway afterwards.
//!
//! Cache mutations are not rolled back if persisting the diff fails later.

use crate::cache::CanonicalCache;
use crate::charts::Placement;
use crate::model::{IdentityKey, PatientRecord};
use hashbrown::HashMap;
use tracing::{debug, instrument};

/// Insert/update/delete sets computed by one reconciliation run.
///
/// Updates are unique per `(identity, chart)`, deletes unique per identity. All three
/// preserve the order in which records were processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSets {
    to_update: Vec<PatientRecord>,
    to_insert: Vec<PatientRecord>,
    to_delete: Vec<PatientRecord>,
    update_index: HashMap<(IdentityKey, String), usize>,
    delete_index: HashMap<IdentityKey, usize>,
}

impl DiffSets {
    pub fn to_update(&self) -> &[PatientRecord] {
        &self.to_update
    }

    pub fn to_insert(&self) -> &[PatientRecord] {
        &self.to_insert
    }

    pub fn to_delete(&self) -> &[PatientRecord] {
        &self.to_delete
    }

    /// Pending inserts for one identity.
    pub fn inserts_for<'a>(
        &'a self,
        key: &'a IdentityKey,
    ) -> impl Iterator<Item = &'a PatientRecord> + 'a {
        self.to_insert
            .iter()
            .filter(move |record| &record.identity_key() == key)
    }

    pub fn is_empty(&self) -> bool {
        self.to_update.is_empty() && self.to_insert.is_empty() && self.to_delete.is_empty()
    }

    pub(crate) fn push_update(&mut self, record: PatientRecord) {
        let slot = (record.identity_key(), record.chart.clone());
        match self.update_index.get(&slot) {
            Some(&idx) => self.to_update[idx] = record,
            None => {
                self.update_index.insert(slot, self.to_update.len());
                self.to_update.push(record);
            }
        }
    }

    fn push_insert(&mut self, record: PatientRecord) {
        self.to_insert.push(record);
    }

    pub(crate) fn push_delete(&mut self, record: PatientRecord) {
        let key = record.identity_key();
        match self.delete_index.get(&key) {
            Some(&idx) => self.to_delete[idx] = record,
            None => {
                self.delete_index.insert(key, self.to_delete.len());
                self.to_delete.push(record);
            }
        }
    }
}

/// Reconcile pre-merged records against the cache, in order.
#[instrument(level = "debug", skip_all, fields(records = records.len()))]
pub fn reconcile(cache: &CanonicalCache, records: Vec<PatientRecord>) -> DiffSets {
    let mut diff = DiffSets::default();

    for record in records {
        let key = record.identity_key();
        let placement = cache.update(&key, |charts| charts.place(record));

        match placement {
            Placement::Created(record) | Placement::AddedChart(record) => {
                diff.push_insert(record);
            }
            Placement::Merged { previous, merged }
            | Placement::AbsorbedIntoLatest { previous, merged } => {
                // Only effective changes to tracked fields reach storage.
                if previous.tracked_fields_differ(&merged) {
                    diff.push_update(merged);
                }
            }
            Placement::AbsorbedChartless { chartless, merged } => {
                debug!(identity = %key, chart = %merged.chart, "absorbing chart-less record");
                diff.push_delete(chartless);
                diff.push_insert(merged);
            }
        }
    }

    debug!(
        updates = diff.to_update.len(),
        inserts = diff.to_insert.len(),
        deletes = diff.to_delete.len(),
        "reconciliation diff ready"
    );
    diff
}
