//! SQLite store: WAL-mode database holding bug records and subject counters.
//!
//! Read-modify-write runs inside a `BEGIN IMMEDIATE` transaction, which takes
//! the database write lock up front. That makes upserts atomic across threads
//! sharing this store and across processes sharing the file. Subject counters
//! use a native `ON CONFLICT ... DO UPDATE` increment.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};

use crate::core::errors::{DlError, Result};
use crate::fingerprint::generator::Fingerprint;
use crate::ledger::model::{BugRecord, ContextSnapshot, Severity};
use crate::ledger::store::{BugStore, ModifyFn, SubjectCount, UpsertFn};

/// Default wait for a competing writer before failing with `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const RECORD_COLUMNS: &str = "fingerprint, defect_type, severity, message, details, category,
    occurrence_count, first_seen_at, last_seen_at, context, fingerprint_components, synced_to";

/// Durable [`BugStore`] backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| DlError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

impl BugStore for SqliteStore {
    fn get_record(&self, fingerprint: &str) -> Result<Option<BugRecord>> {
        let conn = self.conn.lock();
        select_record(&conn, fingerprint)
    }

    fn upsert_record(&self, fingerprint: &str, mutator: &mut UpsertFn<'_>) -> Result<BugRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = select_record(&tx, fingerprint)?;
        let next = mutator(existing);
        write_record(&tx, fingerprint, &next)?;
        tx.commit()?;
        Ok(next)
    }

    fn modify_record(
        &self,
        fingerprint: &str,
        mutator: &mut ModifyFn<'_>,
    ) -> Result<Option<BugRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut record) = select_record(&tx, fingerprint)? else {
            return Ok(None);
        };
        mutator(&mut record);
        write_record(&tx, fingerprint, &record)?;
        tx.commit()?;
        Ok(Some(record))
    }

    fn list_records(&self) -> Result<Vec<BugRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!("SELECT {RECORD_COLUMNS} FROM bug_records"))?;
        let raw = stmt
            .query_map([], RawRecordRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawRecordRow::into_record).collect()
    }

    fn increment_subject_counter(&self, subject: &str) -> Result<()> {
        self.conn
            .lock()
            .prepare_cached(
                "INSERT INTO subject_counters (subject, occurrences) VALUES (?1, 1)
                 ON CONFLICT(subject) DO UPDATE SET occurrences = occurrences + 1",
            )?
            .execute(params![subject])?;
        Ok(())
    }

    fn subject_counters(&self) -> Result<Vec<SubjectCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT subject, occurrences FROM subject_counters")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SubjectCount {
                    subject: row.get(0)?,
                    occurrences: count_from_sql(row.get(1)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

// ──────────────────── row mapping ────────────────────

/// Column values as stored, before JSON and timestamp decoding.
struct RawRecordRow {
    fingerprint: String,
    defect_type: String,
    severity: String,
    message: String,
    details: String,
    category: String,
    occurrence_count: i64,
    first_seen_at: String,
    last_seen_at: String,
    context: String,
    fingerprint_components: String,
    synced_to: Option<String>,
}

impl RawRecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fingerprint: row.get(0)?,
            defect_type: row.get(1)?,
            severity: row.get(2)?,
            message: row.get(3)?,
            details: row.get(4)?,
            category: row.get(5)?,
            occurrence_count: row.get(6)?,
            first_seen_at: row.get(7)?,
            last_seen_at: row.get(8)?,
            context: row.get(9)?,
            fingerprint_components: row.get(10)?,
            synced_to: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<BugRecord> {
        let corrupt = |details: String| DlError::Storage {
            key: self.fingerprint.clone(),
            details,
        };
        let fingerprint = Fingerprint::parse(&self.fingerprint)
            .ok_or_else(|| corrupt("malformed fingerprint key".to_string()))?;
        let severity = Severity::from_label(&self.severity)
            .ok_or_else(|| corrupt(format!("unknown severity {:?}", self.severity)))?;
        let context: ContextSnapshot = serde_json::from_str(&self.context)?;
        Ok(BugRecord {
            fingerprint,
            defect_type: self.defect_type,
            severity,
            message: self.message,
            details: serde_json::from_str(&self.details)?,
            category: self.category,
            occurrence_count: count_from_sql(self.occurrence_count),
            first_seen_at: parse_timestamp(&self.first_seen_at).map_err(corrupt)?,
            last_seen_at: parse_timestamp(&self.last_seen_at).map_err(corrupt)?,
            context,
            fingerprint_components: self.fingerprint_components,
            synced_to: self.synced_to,
        })
    }
}

fn select_record(conn: &Connection, fingerprint: &str) -> Result<Option<BugRecord>> {
    let raw = conn
        .prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM bug_records WHERE fingerprint = ?1"
        ))?
        .query_row(params![fingerprint], RawRecordRow::from_row)
        .optional()?;
    raw.map(RawRecordRow::into_record).transpose()
}

fn write_record(conn: &Connection, fingerprint: &str, record: &BugRecord) -> Result<()> {
    conn.prepare_cached(&format!(
        "INSERT OR REPLACE INTO bug_records ({RECORD_COLUMNS})
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)"
    ))?
    .execute(params![
        fingerprint,
        record.defect_type,
        record.severity.as_str(),
        record.message,
        serde_json::to_string(&record.details)?,
        record.category,
        i64::try_from(record.occurrence_count).unwrap_or(i64::MAX),
        format_timestamp(record.first_seen_at),
        format_timestamp(record.last_seen_at),
        serde_json::to_string(&record.context)?,
        record.fingerprint_components,
        record.synced_to,
    ])?;
    Ok(())
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
}

fn count_from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[DL-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bug_records (
            fingerprint TEXT PRIMARY KEY NOT NULL,
            defect_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            details TEXT NOT NULL,
            category TEXT NOT NULL,
            occurrence_count INTEGER NOT NULL CHECK (occurrence_count >= 1),
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            context TEXT NOT NULL,
            fingerprint_components TEXT NOT NULL,
            synced_to TEXT
        );

        CREATE TABLE IF NOT EXISTS subject_counters (
            subject TEXT PRIMARY KEY NOT NULL,
            occurrences INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_bug_records_count ON bug_records(occurrence_count);
        CREATE INDEX IF NOT EXISTS idx_bug_records_unsynced
            ON bug_records(fingerprint) WHERE synced_to IS NULL;",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
