//! # Chart Sets
//!
//! Per-identity ordered sequence of `(chart, record)` entries and the placement rules
//! that decide where an incoming record for that identity lands.
//!
//! Order is load-bearing: an incoming chart-less record is absorbed into the most
//! recently inserted chart-bearing entry. Replacing an existing chart keeps its
//! position; removing and re-adding moves it to the end.

use crate::model::{PatientRecord, NO_CHART};

/// Ordered chart entries for a single identity.
///
/// Holds at most one chart-less entry, and never a chart-less entry alongside
/// chart-bearing ones once [`ChartSet::place`] has been used to build it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartSet {
    entries: Vec<(String, PatientRecord)>,
}

/// Outcome of placing one record into a [`ChartSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The set was empty; the record became its only entry.
    Created(PatientRecord),
    /// An entry with the same chart existed and was merged in place.
    Merged {
        previous: PatientRecord,
        merged: PatientRecord,
    },
    /// The chart-less entry was removed and merged under the incoming chart.
    AbsorbedChartless {
        chartless: PatientRecord,
        merged: PatientRecord,
    },
    /// A chart-less record was folded into the latest chart-bearing entry.
    AbsorbedIntoLatest {
        previous: PatientRecord,
        merged: PatientRecord,
    },
    /// A new independent chart entry was appended.
    AddedChart(PatientRecord),
}

impl ChartSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(record: PatientRecord) -> Self {
        Self {
            entries: vec![(record.chart.clone(), record)],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, chart: &str) -> Option<&PatientRecord> {
        self.position(chart).map(|idx| &self.entries[idx].1)
    }

    pub fn contains(&self, chart: &str) -> bool {
        self.position(chart).is_some()
    }

    pub fn chartless(&self) -> Option<&PatientRecord> {
        self.get(NO_CHART)
    }

    /// Most recently inserted chart-bearing entry.
    pub fn latest_charted(&self) -> Option<&PatientRecord> {
        self.entries
            .iter()
            .rev()
            .find(|(chart, _)| !chart.is_empty())
            .map(|(_, record)| record)
    }

    /// Insert `record` at its chart: replaced in place if present, appended otherwise.
    pub fn upsert(&mut self, record: PatientRecord) {
        match self.position(&record.chart) {
            Some(idx) => self.entries[idx].1 = record,
            None => self.entries.push((record.chart.clone(), record)),
        }
    }

    pub fn remove(&mut self, chart: &str) -> Option<PatientRecord> {
        self.position(chart).map(|idx| self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientRecord> {
        self.entries.iter().map(|(_, record)| record)
    }

    pub fn charts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(chart, _)| chart.as_str())
    }

    pub fn into_records(self) -> Vec<PatientRecord> {
        self.entries.into_iter().map(|(_, record)| record).collect()
    }

    /// Place an incoming record for this identity.
    ///
    /// Rules, first match wins:
    /// 1. empty set: the record becomes the only entry
    /// 2. same chart present: merge in place
    /// 3. incoming has a chart and a chart-less entry exists: absorb it under the new chart
    /// 4. incoming is chart-less: fold into the latest chart-bearing entry
    /// 5. otherwise append as an independent chart
    pub fn place(&mut self, incoming: PatientRecord) -> Placement {
        if self.entries.is_empty() {
            self.upsert(incoming.clone());
            return Placement::Created(incoming);
        }

        if let Some(previous) = self.get(&incoming.chart).cloned() {
            let merged = previous.merged_with(&incoming);
            self.upsert(merged.clone());
            return Placement::Merged { previous, merged };
        }

        if incoming.has_chart() {
            if let Some(chartless) = self.remove(NO_CHART) {
                let merged = chartless.merged_with(&incoming);
                self.upsert(merged.clone());
                return Placement::AbsorbedChartless { chartless, merged };
            }
        } else if let Some(previous) = self.latest_charted().cloned() {
            let merged = previous.merged_with(&incoming);
            self.upsert(merged.clone());
            return Placement::AbsorbedIntoLatest { previous, merged };
        }

        self.upsert(incoming.clone());
        Placement::AddedChart(incoming)
    }

    fn position(&self, chart: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == chart)
    }
}
