//! Deduplication recorder: folds raw occurrences into bug records.
//!
//! One `record()` call is one atomic merge-or-create against the store,
//! followed by a best-effort bump of the subject counter. The engine holds no
//! mutable state of its own, so a single instance can be shared by reference
//! or `Arc` across every simulation worker.

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::classify::subject::NO_SUBJECT;
use crate::core::errors::{DlError, Result};
use crate::fingerprint::generator::{FingerprintAnalysis, Fingerprinter};
use crate::ledger::model::{BugRecord, Context, Occurrence};
use crate::ledger::query::{DEFAULT_MOST_FREQUENT_N, LedgerQuery};
use crate::ledger::store::BugStore;
use crate::logger::channel::{LedgerEvent, LedgerLoggerHandle};

/// Result of one `record()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// Post-merge record.
    pub record: BugRecord,
    /// True when this occurrence opened a new record.
    pub created: bool,
}

/// The ledger's write path. Owns the store handle and the fingerprinter.
pub struct DedupEngine {
    store: Arc<dyn BugStore>,
    fingerprinter: Fingerprinter,
    logger: Option<LedgerLoggerHandle>,
    most_frequent_n: usize,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine")
            .field("backend", &self.store.backend_name())
            .field("fingerprinter", &self.fingerprinter)
            .field("logging", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

impl DedupEngine {
    pub fn new(store: Arc<dyn BugStore>, fingerprinter: Fingerprinter) -> Self {
        Self {
            store,
            fingerprinter,
            logger: None,
            most_frequent_n: DEFAULT_MOST_FREQUENT_N,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: LedgerLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Size of the `most_frequent` list in `stats()`.
    #[must_use]
    pub const fn with_most_frequent_n(mut self, n: usize) -> Self {
        self.most_frequent_n = n;
        self
    }

    pub fn store(&self) -> &dyn BugStore {
        self.store.as_ref()
    }

    pub const fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Record one occurrence, stamped with the current time.
    pub fn record(&self, occurrence: &Occurrence, context: &Context) -> Result<RecordOutcome> {
        self.record_at(occurrence, context, Utc::now())
    }

    /// Record one occurrence observed at `now`.
    ///
    /// A failed upsert is returned to the caller and nothing is counted. A
    /// failed subject-counter bump after a committed upsert is reported to
    /// the activity log and stderr only; the returned record is still valid.
    pub fn record_at(
        &self,
        occurrence: &Occurrence,
        context: &Context,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let analysis = self.fingerprinter.analyze(occurrence, context);
        let category = self
            .fingerprinter
            .taxonomy()
            .category_of(&analysis.defect_type);

        let mut created = false;
        let upserted = self
            .store
            .upsert_record(analysis.fingerprint.as_str(), &mut |existing| {
                if let Some(mut record) = existing {
                    created = false;
                    record.occurrence_count += 1;
                    record.last_seen_at = record.last_seen_at.max(now);
                    record
                } else {
                    created = true;
                    new_record(&analysis, category.as_str(), occurrence, context, now)
                }
            });

        let record = match upserted {
            Ok(record) => record,
            Err(err) => {
                self.report_failure("upsert_record", analysis.fingerprint.as_str(), &err);
                return Err(err);
            }
        };

        if created {
            self.log(LedgerEvent::BugCreated {
                fingerprint: record.fingerprint.to_string(),
                defect_type: record.defect_type.clone(),
                category: record.category.clone(),
                severity: record.severity.as_str().to_string(),
                subject: analysis.subject.clone(),
            });
        } else {
            self.log(LedgerEvent::OccurrenceMerged {
                fingerprint: record.fingerprint.to_string(),
                occurrence_count: record.occurrence_count,
            });
        }

        if analysis.subject != NO_SUBJECT {
            if let Err(err) = self.store.increment_subject_counter(&analysis.subject) {
                self.report_failure("increment_subject_counter", &analysis.subject, &err);
            }
        }

        Ok(RecordOutcome { record, created })
    }

    /// Read-side view over the same store.
    pub fn query(&self) -> LedgerQuery<'_> {
        let query =
            LedgerQuery::new(self.store.as_ref()).with_most_frequent_n(self.most_frequent_n);
        match &self.logger {
            Some(logger) => query.with_logger(logger),
            None => query,
        }
    }

    fn log(&self, event: LedgerEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    fn report_failure(&self, operation: &'static str, key: &str, err: &DlError) {
        eprintln!("[DL-LEDGER] {operation} failed for {key}: {err}");
        self.log(LedgerEvent::StoreFailure {
            operation,
            key: key.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
}

fn new_record(
    analysis: &FingerprintAnalysis,
    category: &str,
    occurrence: &Occurrence,
    context: &Context,
    now: DateTime<Utc>,
) -> BugRecord {
    BugRecord {
        fingerprint: analysis.fingerprint.clone(),
        defect_type: analysis.defect_type.clone(),
        severity: occurrence.severity,
        message: occurrence.message.clone(),
        details: occurrence.details.clone(),
        category: category.to_string(),
        occurrence_count: 1,
        first_seen_at: now,
        last_seen_at: now,
        context: context.snapshot(),
        fingerprint_components: analysis.description.clone(),
        synced_to: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryStore;
    use crate::ledger::model::Severity;
    use crate::ledger::store::{ModifyFn, SubjectCount, UpsertFn};
    use chrono::{Duration, TimeZone};

    fn engine() -> DedupEngine {
        DedupEngine::new(Arc::new(MemoryStore::new()), Fingerprinter::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn zombie(name: &str) -> Occurrence {
        Occurrence::new("zombie_creature", Severity::Critical, "creature at 0 hp on board")
            .with_detail("creature", name)
    }

    #[test]
    fn repeated_occurrences_merge_into_one_record() {
        let engine = engine();
        let occ = zombie("Black Swan");
        let ctx = Context::new("PLAY_CARD", "MAIN");
        for i in 0..5_u64 {
            let at = t0() + Duration::seconds(i64::try_from(i).unwrap());
            let outcome = engine.record_at(&occ, &ctx, at).unwrap();
            assert_eq!(outcome.created, i == 0);
            assert_eq!(outcome.record.occurrence_count, i + 1);
        }
        let records = engine.store().list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].first_seen_at, t0());
        assert_eq!(records[0].last_seen_at, t0() + Duration::seconds(4));
    }

    #[test]
    fn first_seen_fields_are_kept_on_merge() {
        let engine = engine();
        let first = zombie("Black Swan");
        engine
            .record_at(&first, &Context::new("PLAY_CARD", "MAIN").with_turn(3), t0())
            .unwrap();

        let mut second = zombie("black  swan");
        second.message = "a different message".to_string();
        second.severity = Severity::Low;
        let later = t0() + Duration::hours(1);
        let outcome = engine
            .record_at(&second, &Context::new("DECLARE_ATTACK", "COMBAT"), later)
            .unwrap();

        assert!(!outcome.created);
        let record = outcome.record;
        assert_eq!(record.occurrence_count, 2);
        assert_eq!(record.message, "creature at 0 hp on board");
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(record.context.action_type.as_deref(), Some("PLAY_CARD"));
        assert_eq!(record.context.turn, Some(3));
        assert_eq!(record.last_seen_at, t0() + Duration::hours(1));
    }

    #[test]
    fn out_of_order_timestamps_never_move_last_seen_backwards() {
        let engine = engine();
        let occ = zombie("Orca");
        let ctx = Context::default();
        engine.record_at(&occ, &ctx, t0() + Duration::minutes(5)).unwrap();
        let outcome = engine.record_at(&occ, &ctx, t0()).unwrap();
        assert_eq!(outcome.record.last_seen_at, t0() + Duration::minutes(5));
    }

    #[test]
    fn distinct_fingerprints_create_distinct_records() {
        let engine = engine();
        let ctx = Context::default();
        for name in ["Orca", "Mako", "Kelp Wall"] {
            engine.record_at(&zombie(name), &ctx, t0()).unwrap();
        }
        assert_eq!(engine.store().list_records().unwrap().len(), 3);
    }

    #[test]
    fn unknown_types_fall_back_to_other() {
        let engine = engine();
        let occ = Occurrence::new("mana_leak", Severity::Medium, "mana went negative")
            .with_detail("card", "Tide Pool");
        let outcome = engine.record(&occ, &Context::default()).unwrap();
        assert_eq!(outcome.record.category, "other");

        let known = engine
            .record(&zombie("Orca"), &Context::default())
            .unwrap();
        assert_eq!(known.record.category, "state_corruption");
    }

    #[test]
    fn record_stores_description_and_resolved_type() {
        let engine = engine();
        let occ = Occurrence {
            defect_type: None,
            severity: Severity::Low,
            message: String::new(),
            details: serde_json::Map::new(),
        };
        let outcome = engine.record(&occ, &Context::new("PASS", "END")).unwrap();
        assert_eq!(outcome.record.defect_type, "unknown_type");
        assert_eq!(
            outcome.record.fingerprint_components,
            "Type: unknown_type, Action: PASS, Phase: END, Card: NO_CARD"
        );
    }

    #[test]
    fn subject_counter_counts_every_occurrence_but_skips_sentinel() {
        let engine = engine();
        let ctx = Context::default();
        engine.record(&zombie("Orca"), &ctx).unwrap();
        engine.record(&zombie("Orca"), &ctx).unwrap();
        let lure = Occurrence::new("lure_bypass", Severity::High, "")
            .with_detail("attacker", "Orca");
        engine.record(&lure, &ctx).unwrap();
        let bare = Occurrence::new("hand_overflow", Severity::Low, "");
        engine.record(&bare, &ctx).unwrap();

        let counts = engine.store().subject_counters().unwrap();
        assert_eq!(
            counts,
            vec![SubjectCount {
                subject: "orca".into(),
                occurrences: 3
            }]
        );
    }

    struct FailingStore {
        fail_upsert: bool,
        inner: MemoryStore,
    }

    impl BugStore for FailingStore {
        fn get_record(&self, fingerprint: &str) -> Result<Option<BugRecord>> {
            self.inner.get_record(fingerprint)
        }

        fn upsert_record(
            &self,
            fingerprint: &str,
            mutator: &mut UpsertFn<'_>,
        ) -> Result<BugRecord> {
            if self.fail_upsert {
                return Err(DlError::Storage {
                    key: fingerprint.to_string(),
                    details: "disk full".to_string(),
                });
            }
            self.inner.upsert_record(fingerprint, mutator)
        }

        fn modify_record(
            &self,
            fingerprint: &str,
            mutator: &mut ModifyFn<'_>,
        ) -> Result<Option<BugRecord>> {
            self.inner.modify_record(fingerprint, mutator)
        }

        fn list_records(&self) -> Result<Vec<BugRecord>> {
            self.inner.list_records()
        }

        fn increment_subject_counter(&self, subject: &str) -> Result<()> {
            Err(DlError::Storage {
                key: subject.to_string(),
                details: "counter table unavailable".to_string(),
            })
        }

        fn subject_counters(&self) -> Result<Vec<SubjectCount>> {
            self.inner.subject_counters()
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn upsert_failure_propagates() {
        let engine = DedupEngine::new(
            Arc::new(FailingStore {
                fail_upsert: true,
                inner: MemoryStore::new(),
            }),
            Fingerprinter::default(),
        );
        let err = engine
            .record(&zombie("Orca"), &Context::default())
            .unwrap_err();
        assert_eq!(err.code(), "DL-2103");
        assert!(engine.store().list_records().unwrap().is_empty());
    }

    #[test]
    fn counter_failure_does_not_fail_the_record() {
        let engine = DedupEngine::new(
            Arc::new(FailingStore {
                fail_upsert: false,
                inner: MemoryStore::new(),
            }),
            Fingerprinter::default(),
        );
        let outcome = engine.record(&zombie("Orca"), &Context::default()).unwrap();
        assert!(outcome.created);
        assert_eq!(engine.store().list_records().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_workers_converge_on_one_record() {
        let engine = Arc::new(engine());
        let occ = Occurrence::new("summoning_sickness", Severity::High, "attacked too early")
            .with_detail("attacker", "Mako");
        let ctx = Context::new("DECLARE_ATTACK", "COMBAT");

        let workers: Vec<_> = (0..10)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let occ = occ.clone();
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        engine.record(&occ, &ctx).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let records = engine.store().list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].occurrence_count, 1000);
        let counts = engine.store().subject_counters().unwrap();
        assert_eq!(counts[0].occurrences, 1000);
    }
}
