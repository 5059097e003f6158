//! # Canonical Cache
//!
//! In-memory mirror of the reconciled patient store, keyed by identity for duplicate
//! detection. A single exclusive lock covers every operation, so calls serialize
//! globally even for unrelated identities.
//!
//! The cache is owned by whoever builds the pipeline and shared through an `Arc`;
//! it has no persistence of its own and starts empty unless hydrated.

use crate::charts::{ChartSet, Placement};
use crate::model::{IdentityKey, PatientRecord};
use crate::reconcile::DiffSets;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Entry counts reported at the start of each reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub identities: usize,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct CanonicalCache {
    inner: Mutex<HashMap<IdentityKey, ChartSet>>,
}

impl CanonicalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<ChartSet> {
        self.inner.lock().get(key).cloned()
    }

    /// Snapshot of every identity.
    pub fn get_all(&self) -> HashMap<IdentityKey, ChartSet> {
        self.inner.lock().clone()
    }

    pub fn set(&self, key: IdentityKey, charts: ChartSet) {
        self.inner.lock().insert(key, charts);
    }

    pub fn has(&self, key: &IdentityKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn delete(&self, key: &IdentityKey) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Read-modify-write one identity under the lock.
    ///
    /// `f` sees an empty set when the identity is unknown. A set left empty is
    /// dropped, so `has` stays false for identities that never gained an entry.
    pub fn update<R>(&self, key: &IdentityKey, f: impl FnOnce(&mut ChartSet) -> R) -> R {
        let mut guard = self.inner.lock();
        let charts = guard.entry(key.clone()).or_default();
        let out = f(charts);
        if charts.is_empty() {
            guard.remove(key);
        }
        out
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.inner.lock();
        CacheStats {
            identities: guard.len(),
            entries: guard.values().map(ChartSet::len).sum(),
        }
    }

    /// Rebuild entries from persisted rows, oldest first, through the same placement
    /// rules reconciliation uses.
    ///
    /// Rows that violate those rules in storage (a chart-less row beside charted rows,
    /// duplicate rows for one chart) are folded together here; the returned repairs
    /// bring the table back in line with the cache.
    pub fn hydrate<I>(&self, records: I) -> Hydration
    where
        I: IntoIterator<Item = PatientRecord>,
    {
        let mut guard = self.inner.lock();
        let mut hydration = Hydration::default();
        for record in records {
            let stored = record.clone();
            let charts = guard.entry(record.identity_key()).or_default();
            match charts.place(record) {
                Placement::Created(_) | Placement::AddedChart(_) => {}
                Placement::Merged { previous, merged } => {
                    if merged.tracked_fields_differ(&previous)
                        || merged.tracked_fields_differ(&stored)
                    {
                        hydration.repairs.push_update(merged);
                    }
                }
                Placement::AbsorbedChartless { chartless, merged } => {
                    if merged.tracked_fields_differ(&stored) {
                        hydration.repairs.push_update(merged);
                    }
                    hydration.repairs.push_delete(chartless);
                }
                Placement::AbsorbedIntoLatest { previous, merged } => {
                    if merged.tracked_fields_differ(&previous) {
                        hydration.repairs.push_update(merged);
                    }
                    hydration.repairs.push_delete(stored);
                }
            }
            hydration.loaded += 1;
        }
        hydration
    }
}

/// Result of [`CanonicalCache::hydrate`].
#[derive(Debug, Clone, Default)]
pub struct Hydration {
    /// Persisted rows read.
    pub loaded: usize,
    pub repairs: DiffSets,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let cache = CanonicalCache::new();
        let record = PatientRecord::new("Lee", "01018556059", "C1");
        let key = record.identity_key();

        assert!(!cache.has(&key));
        cache.set(key.clone(), ChartSet::single(record.clone()));
        assert!(cache.has(&key));
        assert_eq!(cache.get(&key).unwrap().get("C1"), Some(&record));
        assert_eq!(cache.get_all().len(), 1);

        assert!(cache.delete(&key));
        assert!(!cache.delete(&key));

        cache.set(key.clone(), ChartSet::single(record));
        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_update_drops_empty_sets() {
        let cache = CanonicalCache::new();
        let key = IdentityKey::new("Lee", "01018556059");

        let was_empty = cache.update(&key, |charts| charts.is_empty());
        assert!(was_empty);
        assert!(!cache.has(&key));
    }

    #[test]
    fn test_hydrate_counts_entries() {
        let cache = CanonicalCache::new();
        let hydration = cache.hydrate(vec![
            PatientRecord::new("Lee", "01018556059", "C1"),
            PatientRecord::new("Lee", "01018556059", "C2"),
            PatientRecord::new("Park", "01022223333", ""),
        ]);

        assert_eq!(hydration.loaded, 3);
        assert!(hydration.repairs.is_empty());
        assert_eq!(
            cache.stats(),
            CacheStats {
                identities: 2,
                entries: 3
            }
        );
    }

    #[test]
    fn test_hydrate_folds_chartless_row_into_later_chart() {
        let cache = CanonicalCache::new();
        let mut chartless = PatientRecord::new("Kim", "01011112222", "");
        chartless.memo = "walk-in".to_string();
        let charted = PatientRecord::new("Kim", "01011112222", "C1");

        let hydration = cache.hydrate(vec![chartless.clone(), charted]);

        let charts = cache.get(&chartless.identity_key()).unwrap();
        assert!(charts.chartless().is_none());
        assert_eq!(charts.charts().collect::<Vec<_>>(), vec!["C1"]);
        assert_eq!(charts.get("C1").unwrap().memo, "walk-in");

        assert_eq!(hydration.repairs.to_delete(), &[chartless]);
        assert_eq!(hydration.repairs.to_update().len(), 1);
        assert_eq!(hydration.repairs.to_update()[0].chart, "C1");
        assert_eq!(hydration.repairs.to_update()[0].memo, "walk-in");
        assert!(hydration.repairs.to_insert().is_empty());
    }

    #[test]
    fn test_hydrate_folds_chartless_row_into_earlier_chart() {
        let cache = CanonicalCache::new();
        let charted = PatientRecord::new("Kim", "01011112222", "C1");
        let chartless = PatientRecord::new("Kim", "01011112222", "");

        let hydration = cache.hydrate(vec![charted.clone(), chartless.clone()]);

        let charts = cache.get(&charted.identity_key()).unwrap();
        assert!(charts.chartless().is_none());
        assert_eq!(charts.len(), 1);
        assert_eq!(hydration.repairs.to_delete(), &[chartless]);
        assert!(hydration.repairs.to_update().is_empty());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let cache = Arc::new(CanonicalCache::new());
        let key = IdentityKey::new("Lee", "01018556059");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        let chart = format!("C{i}-{j}");
                        cache.update(&key, |charts| {
                            charts.upsert(PatientRecord::new("Lee", "01018556059", chart));
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get(&key).unwrap().len(), 400);
    }
}
