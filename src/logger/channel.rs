//! Logger thread: the only owner of the `JsonlWriter`.
//!
//! Recorders on any thread send `LedgerEvent`s through a bounded crossbeam
//! channel. `send()` uses `try_send()`, so a slow disk never stalls a
//! simulation worker; overflow is counted and reported as its own log line.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DlError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, LogLevel};

/// Default bounded channel capacity.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Events the ledger reports about itself.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    SessionStarted {
        version: String,
        backend: String,
        config_hash: String,
    },
    SessionStopped {
        recorded: u64,
        uptime_secs: u64,
    },
    BugCreated {
        fingerprint: String,
        defect_type: String,
        category: String,
        severity: String,
        subject: String,
    },
    OccurrenceMerged {
        fingerprint: String,
        occurrence_count: u64,
    },
    SyncMarked {
        fingerprint: String,
        external_id: String,
    },
    /// `mark_synced` named a fingerprint the store does not hold.
    SyncMissed {
        fingerprint: String,
        external_id: String,
    },
    StoreFailure {
        operation: &'static str,
        key: String,
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable, `Send + Sync` handle to the logger thread.
#[derive(Clone)]
pub struct LedgerLoggerHandle {
    tx: Sender<LedgerEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for LedgerLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerLoggerHandle")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl LedgerLoggerHandle {
    /// Non-blocking. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: LedgerEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks until queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LedgerEvent::Shutdown);
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            jsonl: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread. It runs until `shutdown()` or until every
/// handle is dropped.
pub fn spawn_logger(config: LoggerConfig) -> Result<(LedgerLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<LedgerEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = LedgerLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("dledger-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, &dropped))
        .map_err(|e| DlError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<LedgerEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::LogBackpressure, LogLevel::Warning);
            warn.details = Some(format!("dropped={lost}"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, LedgerEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&to_log_entry(event));
    }

    jsonl.flush();
    jsonl.fsync();
}

fn to_log_entry(event: LedgerEvent) -> LogEntry {
    match event {
        LedgerEvent::SessionStarted {
            version,
            backend,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::SessionStart, LogLevel::Info);
            e.details = Some(format!(
                "version={version} backend={backend} config_hash={config_hash}"
            ));
            e
        }
        LedgerEvent::SessionStopped {
            recorded,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::SessionStop, LogLevel::Info);
            e.details = Some(format!("recorded={recorded} uptime={uptime_secs}s"));
            e
        }
        LedgerEvent::BugCreated {
            fingerprint,
            defect_type,
            category,
            severity,
            subject,
        } => {
            let mut e = LogEntry::new(EventType::BugCreated, LogLevel::Info);
            e.fingerprint = Some(fingerprint);
            e.defect_type = Some(defect_type);
            e.category = Some(category);
            e.severity = Some(severity);
            e.subject = Some(subject);
            e.occurrence_count = Some(1);
            e
        }
        LedgerEvent::OccurrenceMerged {
            fingerprint,
            occurrence_count,
        } => {
            let mut e = LogEntry::new(EventType::OccurrenceMerged, LogLevel::Info);
            e.fingerprint = Some(fingerprint);
            e.occurrence_count = Some(occurrence_count);
            e
        }
        LedgerEvent::SyncMarked {
            fingerprint,
            external_id,
        } => {
            let mut e = LogEntry::new(EventType::SyncMarked, LogLevel::Info);
            e.fingerprint = Some(fingerprint);
            e.external_id = Some(external_id);
            e
        }
        LedgerEvent::SyncMissed {
            fingerprint,
            external_id,
        } => {
            let mut e = LogEntry::new(EventType::SyncMissed, LogLevel::Warning);
            e.fingerprint = Some(fingerprint);
            e.external_id = Some(external_id);
            e
        }
        LedgerEvent::StoreFailure {
            operation,
            key,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::StoreFailure, LogLevel::Error);
            e.details = Some(format!("operation={operation} key={key}"));
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        LedgerEvent::Shutdown => LogEntry::new(EventType::SessionStop, LogLevel::Info),
    }
}
