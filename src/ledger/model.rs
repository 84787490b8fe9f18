//! Ledger data model: raw occurrences from the detector and the persisted
//! deduplicated bug records.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::fingerprint::generator::Fingerprint;

/// Severity assigned by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw detection event. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Taxonomy key. Missing types fingerprint as `unknown_type`.
    #[serde(default, alias = "defectType", skip_serializing_if = "Option::is_none")]
    pub defect_type: Option<String>,
    pub severity: Severity,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Unstructured payload; entity references live under varying keys.
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: Map<String, Value>,
}

impl Occurrence {
    pub fn new(
        defect_type: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            defect_type: Some(defect_type.into()),
            severity,
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Attach one details entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Treat an explicit JSON `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Situation the occurrence was detected in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    #[serde(alias = "actionType")]
    pub action_type: Option<String>,
    pub phase: Option<String>,
    #[serde(alias = "turnNumber")]
    pub turn_number: Option<i64>,
    #[serde(alias = "activeSubjectIndex", alias = "activePlayerIndex")]
    pub active_subject_index: Option<i64>,
}

impl Context {
    pub fn new(action_type: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            action_type: Some(action_type.into()),
            phase: Some(phase.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_turn(mut self, turn_number: i64) -> Self {
        self.turn_number = Some(turn_number);
        self
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            action_type: self.action_type.clone(),
            phase: self.phase.clone(),
            turn: self.turn_number,
            active_subject_index: self.active_subject_index,
        }
    }
}

/// First-occurrence context kept on a record for diagnostics. Not identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub action_type: Option<String>,
    pub phase: Option<String>,
    pub turn: Option<i64>,
    pub active_subject_index: Option<i64>,
}

/// Detector output as it arrives on the wire: one occurrence plus context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub occurrence: Occurrence,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: Context,
}

/// Persisted, deduplicated aggregate for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugRecord {
    pub fingerprint: Fingerprint,
    pub defect_type: String,
    pub severity: Severity,
    pub message: String,
    pub details: Map<String, Value>,
    /// Category label (see `DefectCategory`).
    pub category: String,
    pub occurrence_count: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub context: ContextSnapshot,
    pub fingerprint_components: String,
    /// External tracker id; `None` means pending sync.
    pub synced_to: Option<String>,
}

impl BugRecord {
    pub fn is_synced(&self) -> bool {
        self.synced_to.is_some()
    }
}
