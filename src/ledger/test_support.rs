//! Shared fixtures for ledger unit tests.

use chrono::{TimeZone, Utc};
use serde_json::Map;

use crate::fingerprint::generator::Fingerprint;
use crate::ledger::model::{BugRecord, ContextSnapshot, Severity};

pub fn sample_record(fingerprint: &str, occurrence_count: u64) -> BugRecord {
    let seen = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    BugRecord {
        fingerprint: Fingerprint::parse(fingerprint).expect("valid test fingerprint"),
        defect_type: "duplicate_ids".to_string(),
        severity: Severity::Critical,
        message: "two cards share an id".to_string(),
        details: Map::new(),
        category: "state_corruption".to_string(),
        occurrence_count,
        first_seen_at: seen,
        last_seen_at: seen,
        context: ContextSnapshot::default(),
        fingerprint_components: "Type: duplicate_ids, Card: NO_CARD, (structural - action/phase ignored)"
            .to_string(),
        synced_to: None,
    }
}
