//! In-process store: per-fingerprint locks over a shared map.
//!
//! The outer `RwLock` is only held long enough to find or create a key's
//! slot; the read-modify-write itself runs under that slot's own mutex, so
//! writes to different fingerprints never wait on each other.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::errors::Result;
use crate::ledger::model::BugRecord;
use crate::ledger::store::{BugStore, ModifyFn, SubjectCount, UpsertFn};

type Slot = Arc<Mutex<Option<BugRecord>>>;

/// Volatile [`BugStore`] for tests, dry runs, and single-process harnesses.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Slot>>,
    subjects: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, fingerprint: &str) -> Option<Slot> {
        self.records.read().get(fingerprint).cloned()
    }

    fn slot_or_insert(&self, fingerprint: &str) -> Slot {
        if let Some(slot) = self.slot(fingerprint) {
            return slot;
        }
        let mut records = self.records.write();
        Arc::clone(
            records
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }
}

impl BugStore for MemoryStore {
    fn get_record(&self, fingerprint: &str) -> Result<Option<BugRecord>> {
        let Some(slot) = self.slot(fingerprint) else {
            return Ok(None);
        };
        let record = slot.lock().clone();
        Ok(record)
    }

    fn upsert_record(&self, fingerprint: &str, mutator: &mut UpsertFn<'_>) -> Result<BugRecord> {
        let slot = self.slot_or_insert(fingerprint);
        let mut guard = slot.lock();
        let next = mutator(guard.clone());
        *guard = Some(next.clone());
        Ok(next)
    }

    fn modify_record(
        &self,
        fingerprint: &str,
        mutator: &mut ModifyFn<'_>,
    ) -> Result<Option<BugRecord>> {
        let Some(slot) = self.slot(fingerprint) else {
            return Ok(None);
        };
        let mut guard = slot.lock();
        Ok(guard.as_mut().map(|record| {
            mutator(record);
            record.clone()
        }))
    }

    fn list_records(&self) -> Result<Vec<BugRecord>> {
        let slots: Vec<Slot> = self.records.read().values().cloned().collect();
        Ok(slots
            .iter()
            .filter_map(|slot| slot.lock().clone())
            .collect())
    }

    fn increment_subject_counter(&self, subject: &str) -> Result<()> {
        *self
            .subjects
            .lock()
            .entry(subject.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    fn subject_counters(&self) -> Result<Vec<SubjectCount>> {
        Ok(self
            .subjects
            .lock()
            .iter()
            .map(|(subject, occurrences)| SubjectCount {
                subject: subject.clone(),
                occurrences: *occurrences,
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::test_support::sample_record;

    #[test]
    fn upsert_creates_then_mutates() {
        let store = MemoryStore::new();
        let created = store
            .upsert_record("0000abcd", &mut |existing| {
                assert!(existing.is_none());
                sample_record("0000abcd", 1)
            })
            .unwrap();
        assert_eq!(created.occurrence_count, 1);

        let merged = store
            .upsert_record("0000abcd", &mut |existing| {
                let mut record = existing.expect("record exists");
                record.occurrence_count += 1;
                record
            })
            .unwrap();
        assert_eq!(merged.occurrence_count, 2);
        assert_eq!(store.get_record("0000abcd").unwrap(), Some(merged));
    }

    #[test]
    fn modify_missing_record_is_none() {
        let store = MemoryStore::new();
        let mut called = false;
        let out = store
            .modify_record("deadbeef", &mut |_| called = true)
            .unwrap();
        assert!(out.is_none());
        assert!(!called);
        assert!(store.list_records().unwrap().is_empty());
    }

    #[test]
    fn subject_counters_accumulate() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.increment_subject_counter("orca").unwrap();
        }
        store.increment_subject_counter("mako").unwrap();
        let mut counts = store.subject_counters().unwrap();
        counts.sort_by(|a, b| a.subject.cmp(&b.subject));
        assert_eq!(counts[0], SubjectCount { subject: "mako".into(), occurrences: 1 });
        assert_eq!(counts[1], SubjectCount { subject: "orca".into(), occurrences: 3 });
    }

    #[test]
    fn concurrent_upserts_do_not_lose_increments() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store
                            .upsert_record("cafef00d", &mut |existing| match existing {
                                Some(mut record) => {
                                    record.occurrence_count += 1;
                                    record
                                }
                                None => sample_record("cafef00d", 1),
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let record = store.get_record("cafef00d").unwrap().unwrap();
        assert_eq!(record.occurrence_count, 2000);
    }
}
