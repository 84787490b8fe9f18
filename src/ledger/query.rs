//! Query and statistics service: read-side view over a `BugStore`.
//!
//! Everything here borrows the store; the only write is `mark_synced`, which
//! goes through the store's atomic `modify_record`.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::errors::Result;
use crate::ledger::model::BugRecord;
use crate::ledger::store::{BugStore, SubjectCount};
use crate::logger::channel::{LedgerEvent, LedgerLoggerHandle};

/// Length of `LedgerStats::most_frequent` unless configured otherwise.
pub const DEFAULT_MOST_FREQUENT_N: usize = 5;

// ──────────────────── stat types ────────────────────

/// Per-category aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStat {
    /// Distinct bugs in the category.
    pub count: u64,
    /// Occurrences summed over those bugs.
    pub occurrences: u64,
}

/// Whole-ledger summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub unique_bugs: u64,
    pub total_occurrences: u64,
    pub by_category: BTreeMap<String, CategoryStat>,
    /// Occurrences per severity label.
    pub by_severity: BTreeMap<String, u64>,
    pub most_frequent: Vec<BugRecord>,
}

// ──────────────────── query view ────────────────────

/// Borrowed query view. Cheap to construct; holds no cache.
pub struct LedgerQuery<'a> {
    store: &'a dyn BugStore,
    logger: Option<&'a LedgerLoggerHandle>,
    most_frequent_n: usize,
}

impl<'a> LedgerQuery<'a> {
    pub fn new(store: &'a dyn BugStore) -> Self {
        Self {
            store,
            logger: None,
            most_frequent_n: DEFAULT_MOST_FREQUENT_N,
        }
    }

    #[must_use]
    pub const fn with_logger(mut self, logger: &'a LedgerLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub const fn with_most_frequent_n(mut self, n: usize) -> Self {
        self.most_frequent_n = n;
        self
    }

    /// All records, most frequent first.
    pub fn all(&self) -> Result<Vec<BugRecord>> {
        let mut records = self.store.list_records()?;
        records.sort_by(rank);
        Ok(records)
    }

    /// Records not yet linked to an external tracker, most frequent first.
    pub fn unsynced(&self) -> Result<Vec<BugRecord>> {
        let mut records = self.all()?;
        records.retain(|r| !r.is_synced());
        Ok(records)
    }

    pub fn by_fingerprint(&self, fingerprint: &str) -> Result<Option<BugRecord>> {
        self.store.get_record(fingerprint)
    }

    pub fn top_n(&self, n: usize) -> Result<Vec<BugRecord>> {
        let mut records = self.all()?;
        records.truncate(n);
        Ok(records)
    }

    /// Link a record to its external tracker id.
    ///
    /// Returns `Ok(false)` and changes nothing when the fingerprint is
    /// unknown. A second call for the same record overwrites the id.
    pub fn mark_synced(&self, fingerprint: &str, external_id: &str) -> Result<bool> {
        let updated = self.store.modify_record(fingerprint, &mut |record| {
            record.synced_to = Some(external_id.to_string());
        })?;

        let event = if updated.is_some() {
            LedgerEvent::SyncMarked {
                fingerprint: fingerprint.to_string(),
                external_id: external_id.to_string(),
            }
        } else {
            LedgerEvent::SyncMissed {
                fingerprint: fingerprint.to_string(),
                external_id: external_id.to_string(),
            }
        };
        if let Some(logger) = self.logger {
            logger.send(event);
        }
        Ok(updated.is_some())
    }

    /// Aggregate counts in one pass over the records.
    pub fn stats(&self) -> Result<LedgerStats> {
        let records = self.all()?;
        let mut stats = LedgerStats::default();

        for record in &records {
            stats.unique_bugs += 1;
            stats.total_occurrences += record.occurrence_count;

            let category = stats.by_category.entry(record.category.clone()).or_default();
            category.count += 1;
            category.occurrences += record.occurrence_count;

            *stats
                .by_severity
                .entry(record.severity.as_str().to_string())
                .or_insert(0) += record.occurrence_count;
        }

        stats.most_frequent = records.into_iter().take(self.most_frequent_n).collect();
        Ok(stats)
    }

    /// Subjects implicated in the most occurrences.
    pub fn top_subjects(&self, n: usize) -> Result<Vec<SubjectCount>> {
        let mut counts = self.store.subject_counters()?;
        counts.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.subject.cmp(&b.subject))
        });
        counts.truncate(n);
        Ok(counts)
    }

    /// Export stats as JSON (for `--json` output and agents).
    pub fn export_json(&self) -> Result<serde_json::Value> {
        let stats = self.stats()?;
        let most_frequent: Vec<serde_json::Value> = stats
            .most_frequent
            .iter()
            .map(|r| {
                serde_json::json!({
                    "fingerprint": r.fingerprint,
                    "defect_type": r.defect_type,
                    "category": r.category,
                    "severity": r.severity,
                    "occurrence_count": r.occurrence_count,
                    "last_seen_at": r.last_seen_at,
                    "synced_to": r.synced_to,
                })
            })
            .collect();
        let subjects = self.top_subjects(self.most_frequent_n)?;

        Ok(serde_json::json!({
            "backend": self.store.backend_name(),
            "unique_bugs": stats.unique_bugs,
            "total_occurrences": stats.total_occurrences,
            "by_category": stats.by_category,
            "by_severity": stats.by_severity,
            "most_frequent": most_frequent,
            "top_subjects": subjects,
        }))
    }
}

/// Count descending, then oldest first, then fingerprint.
fn rank(a: &BugRecord, b: &BugRecord) -> Ordering {
    b.occurrence_count
        .cmp(&a.occurrence_count)
        .then_with(|| a.first_seen_at.cmp(&b.first_seen_at))
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
}
