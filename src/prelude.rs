//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use defect_ledger::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DlError, Result};

// Classification
pub use crate::classify::subject::{NO_SUBJECT, extract_subject};
pub use crate::classify::taxonomy::{DefectCategory, EquivalenceMode, Taxonomy};

// Fingerprinting
pub use crate::fingerprint::generator::{Fingerprint, FingerprintAnalysis, Fingerprinter, fingerprint};

// Ledger
pub use crate::ledger::memory::MemoryStore;
pub use crate::ledger::model::{BugRecord, Context, Occurrence, Report, Severity};
pub use crate::ledger::query::{LedgerQuery, LedgerStats};
pub use crate::ledger::recorder::{DedupEngine, RecordOutcome};
#[cfg(feature = "sqlite")]
pub use crate::ledger::sqlite::SqliteStore;
pub use crate::ledger::store::{BugStore, SubjectCount};

// Logging
pub use crate::logger::channel::{LedgerEvent, LedgerLoggerHandle, LoggerConfig, spawn_logger};
