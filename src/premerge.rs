//! # Batch Pre-Merger
//!
//! Collapses duplicate identities within one upload, in row order, before anything
//! touches the shared cache.

use crate::charts::ChartSet;
use crate::model::{IdentityKey, PatientRecord};
use hashbrown::HashMap;

/// Per-identity chart sets for one batch, in first-seen identity order.
#[derive(Debug, Clone, Default)]
pub struct PreMergedBatch {
    groups: Vec<(IdentityKey, ChartSet)>,
    index: HashMap<IdentityKey, usize>,
}

impl PreMergedBatch {
    pub fn identity_count(&self) -> usize {
        self.groups.len()
    }

    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|(_, charts)| charts.len()).sum()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&ChartSet> {
        self.index.get(key).map(|&idx| &self.groups[idx].1)
    }

    /// Flatten to records: identities in first-seen order, charts in set order.
    pub fn into_records(self) -> Vec<PatientRecord> {
        self.groups
            .into_iter()
            .flat_map(|(_, charts)| charts.into_records())
            .collect()
    }

    fn push(&mut self, record: PatientRecord) {
        let key = record.identity_key();
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                self.groups.push((key.clone(), ChartSet::new()));
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[idx].1.place(record);
    }
}

/// Fold validated records into per-identity chart sets.
pub fn premerge<I>(records: I) -> PreMergedBatch
where
    I: IntoIterator<Item = PatientRecord>,
{
    let mut batch = PreMergedBatch::default();
    for record in records {
        batch.push(record);
    }
    batch
}
