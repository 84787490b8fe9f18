#![forbid(unsafe_code)]

//! Defect ledger (dledger): fingerprinting and deduplication of defect
//! reports produced by a card-game simulation harness.
//!
//! Three layers:
//! 1. **Classification**: taxonomy (structural vs behavioral, category) and
//!    subject extraction from unstructured details.
//! 2. **Fingerprinting**: a deterministic 8-hex key per equivalence class.
//! 3. **Ledger**: atomic merge-or-create of bug records behind a pluggable
//!    store, plus the query/statistics view.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use defect_ledger::prelude::*;
//!
//! let engine = DedupEngine::new(Arc::new(MemoryStore::new()), Fingerprinter::default());
//! let occurrence = Occurrence::new("zombie_creature", Severity::Critical, "0 hp on board")
//!     .with_detail("creature", "Black Swan");
//! let outcome = engine.record(&occurrence, &Context::new("PLAY_CARD", "MAIN"))?;
//! println!("{} x{}", outcome.record.fingerprint, outcome.record.occurrence_count);
//! # Ok::<(), DlError>(())
//! ```

pub mod prelude;

pub mod classify;
pub mod core;
pub mod fingerprint;
pub mod ledger;
pub mod logger;
