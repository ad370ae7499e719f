//! Aggregator and per-ward failure ledger.
//!
//! Result rows and failure counters share one lock so that a snapshot always
//! sees both in a consistent state.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::types::{HierarchyNode, PollingUnitResult, WardKey};

/// Failure counts for one ward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    /// Artifacts that were neither PDF nor image.
    pub non_document: u64,
    /// Documents whose text could not be recovered.
    pub unreadable: u64,
    /// Artifacts whose download exhausted all attempts.
    pub download_failures: u64,
}

impl FailureCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.non_document + self.unreadable + self.download_failures
    }

    fn add(&mut self, other: &Self) {
        self.non_document += other.non_document;
        self.unreadable += other.unreadable;
        self.download_failures += other.download_failures;
    }
}

/// One ledger line, as exposed to reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WardSummary {
    #[serde(flatten)]
    pub ward: WardKey,
    #[serde(flatten)]
    pub counts: FailureCounts,
}

#[derive(Debug, Default)]
struct AggregateState {
    rows: Vec<PollingUnitResult>,
    ledger: BTreeMap<WardKey, FailureCounts>,
}

/// Thread-safe result table plus failure ledger.
///
/// Counters only ever grow and entries are never removed during a run.
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<AggregateState>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        // Every mutation is a single push or increment; poison is harmless.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a result row.
    pub fn record(&self, row: PollingUnitResult) {
        self.lock().rows.push(row);
    }

    /// Ensure `node`'s ward has a ledger entry, creating it with zero counts.
    pub fn touch_ward(&self, node: &HierarchyNode) {
        if let Some(key) = node.ward_key() {
            self.lock().ledger.entry(key).or_default();
        }
    }

    pub fn record_non_document(&self, node: &HierarchyNode) {
        self.bump(node, |counts| counts.non_document += 1);
    }

    pub fn record_unreadable(&self, node: &HierarchyNode) {
        self.bump(node, |counts| counts.unreadable += 1);
    }

    pub fn record_download_failure(&self, node: &HierarchyNode) {
        self.bump(node, |counts| counts.download_failures += 1);
    }

    fn bump(&self, node: &HierarchyNode, update: impl FnOnce(&mut FailureCounts)) {
        let Some(key) = node.ward_key() else {
            tracing::warn!(
                hierarchy = %node.path_label(),
                "failure recorded above ward level, ignoring"
            );
            return;
        };
        update(self.lock().ledger.entry(key).or_default());
    }

    /// Copy of the result table in append order.
    #[must_use]
    pub fn rows(&self) -> Vec<PollingUnitResult> {
        self.lock().rows.clone()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    /// Counts for a single ward, if it has been touched.
    #[must_use]
    pub fn counts(&self, ward: &WardKey) -> Option<FailureCounts> {
        self.lock().ledger.get(ward).copied()
    }

    /// Ledger entries ordered by State, LGA, Ward.
    #[must_use]
    pub fn summary(&self) -> Vec<WardSummary> {
        self.lock()
            .ledger
            .iter()
            .map(|(ward, counts)| WardSummary {
                ward: ward.clone(),
                counts: *counts,
            })
            .collect()
    }

    /// Counters summed over every ward.
    #[must_use]
    pub fn totals(&self) -> FailureCounts {
        let state = self.lock();
        let mut totals = FailureCounts::default();
        for counts in state.ledger.values() {
            totals.add(counts);
        }
        totals
    }

    /// Rows and ledger taken under one lock.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<PollingUnitResult>, Vec<WardSummary>) {
        let state = self.lock();
        let summary = state
            .ledger
            .iter()
            .map(|(ward, counts)| WardSummary {
                ward: ward.clone(),
                counts: *counts,
            })
            .collect();
        (state.rows.clone(), summary)
    }
}
