//! Fingerprint generator: the equivalence relation over occurrences.
//!
//! Identity components depend on the taxonomy's equivalence mode:
//!
//! ```text
//! structural  [defect_type, subject]
//! behavioral  [defect_type, action | NO_ACTION, phase | UNKNOWN_PHASE, subject]
//! ```
//!
//! Components are joined with `|`, lowercased and hashed. Everything here is
//! pure; no locking or I/O.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::subject::extract_subject;
use crate::classify::taxonomy::{EquivalenceMode, Taxonomy};
use crate::fingerprint::hash::{FINGERPRINT_HEX_WIDTH, hash32_hex};
use crate::ledger::model::{Context, Occurrence};

pub const UNKNOWN_TYPE: &str = "unknown_type";
pub const NO_ACTION: &str = "NO_ACTION";
pub const UNKNOWN_PHASE: &str = "UNKNOWN_PHASE";
const SEPARATOR: &str = "|";

/// Deduplication key: 8 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accept an externally supplied fingerprint (CLI argument, stored row).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == FINGERPRINT_HEX_WIDTH
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Every intermediate value of one fingerprint computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintAnalysis {
    pub fingerprint: Fingerprint,
    pub defect_type: String,
    pub subject: String,
    pub mode: EquivalenceMode,
    pub components: Vec<String>,
    /// Lowercased, joined string that was hashed.
    pub canonical: String,
    /// Operator-facing decomposition. Never used for identity.
    pub description: String,
}

/// Computes fingerprints against one taxonomy.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    taxonomy: Taxonomy,
}

impl Fingerprinter {
    pub const fn new(taxonomy: Taxonomy) -> Self {
        Self { taxonomy }
    }

    pub const fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    #[must_use]
    pub fn fingerprint(&self, occurrence: &Occurrence, context: &Context) -> Fingerprint {
        self.analyze(occurrence, context).fingerprint
    }

    #[must_use]
    pub fn describe(&self, occurrence: &Occurrence, context: &Context) -> String {
        self.analyze(occurrence, context).description
    }

    #[must_use]
    pub fn analyze(&self, occurrence: &Occurrence, context: &Context) -> FingerprintAnalysis {
        let defect_type = resolve_defect_type(occurrence).to_string();
        let subject = extract_subject(&occurrence.details);
        let mode = self.taxonomy.equivalence_mode(&defect_type);

        let action = context.action_type.as_deref().unwrap_or(NO_ACTION);
        let phase = context.phase.as_deref().unwrap_or(UNKNOWN_PHASE);

        let (components, description) = match mode {
            EquivalenceMode::Structural => (
                vec![defect_type.clone(), subject.clone()],
                format!(
                    "Type: {defect_type}, Card: {subject}, (structural - action/phase ignored)"
                ),
            ),
            EquivalenceMode::Behavioral => (
                vec![
                    defect_type.clone(),
                    action.to_string(),
                    phase.to_string(),
                    subject.clone(),
                ],
                format!("Type: {defect_type}, Action: {action}, Phase: {phase}, Card: {subject}"),
            ),
        };

        let canonical = components.join(SEPARATOR).to_lowercase();
        FingerprintAnalysis {
            fingerprint: Fingerprint(hash32_hex(&canonical)),
            defect_type,
            subject,
            mode,
            components,
            canonical,
            description,
        }
    }
}

fn resolve_defect_type(occurrence: &Occurrence) -> &str {
    occurrence
        .defect_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_TYPE)
}

/// Fingerprint against the built-in taxonomy.
pub fn fingerprint(occurrence: &Occurrence, context: &Context) -> Fingerprint {
    Fingerprinter::default().fingerprint(occurrence, context)
}
