//! Persistence port: the storage contract the recorder and query service use.
//!
//! Implementations must make `upsert_record` and `modify_record` atomic per
//! fingerprint. Concurrent upserts of the same key must never lose an
//! increment. Upserts of different keys must not serialize on each other
//! beyond what the backend itself imposes.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::ledger::model::BugRecord;

/// Running "implicated in N defect occurrences" tally for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCount {
    pub subject: String,
    pub occurrences: u64,
}

/// Read-modify-write callback for [`BugStore::upsert_record`].
pub type UpsertFn<'a> = dyn FnMut(Option<BugRecord>) -> BugRecord + 'a;

/// In-place callback for [`BugStore::modify_record`].
pub type ModifyFn<'a> = dyn FnMut(&mut BugRecord) + 'a;

/// Key-value persistence for bug records, keyed by fingerprint.
pub trait BugStore: Send + Sync {
    fn get_record(&self, fingerprint: &str) -> Result<Option<BugRecord>>;

    /// Atomically replace the record at `fingerprint` with `mutator(existing)`.
    fn upsert_record(&self, fingerprint: &str, mutator: &mut UpsertFn<'_>) -> Result<BugRecord>;

    /// Atomically mutate an existing record. Returns `None` without calling
    /// `mutator` when no record exists.
    fn modify_record(
        &self,
        fingerprint: &str,
        mutator: &mut ModifyFn<'_>,
    ) -> Result<Option<BugRecord>>;

    /// All records, in no particular order.
    fn list_records(&self) -> Result<Vec<BugRecord>>;

    /// Bump the per-subject counter. Not ordered relative to record upserts.
    fn increment_subject_counter(&self, subject: &str) -> Result<()>;

    /// All per-subject counters, in no particular order.
    fn subject_counters(&self) -> Result<Vec<SubjectCount>>;

    /// Backend label for diagnostics.
    fn backend_name(&self) -> &'static str;
}
