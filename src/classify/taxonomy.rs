//! Defect taxonomy: equivalence mode and triage category per defect type.
//!
//! Both lookups are total. A defect type that is not listed as structural is
//! behavioral, and a defect type without a category mapping lands in
//! [`DefectCategory::Other`]. Category never participates in identity.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DlError, Result};

/// How two occurrences of the same defect type are judged equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquivalenceMode {
    /// Invalid state that exists regardless of when it was observed.
    /// Identity is `(defect_type, subject)`.
    Structural,
    /// Rule violation tied to an operation and lifecycle stage.
    /// Identity is `(defect_type, action, phase, subject)`.
    Behavioral,
}

impl EquivalenceMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Behavioral => "behavioral",
        }
    }
}

impl fmt::Display for EquivalenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triage bucket shown on dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectCategory {
    StateCorruption,
    RuleViolation,
    CombatError,
    CalculationError,
    DataIntegrity,
    Other,
}

impl DefectCategory {
    pub const ALL: [Self; 6] = [
        Self::StateCorruption,
        Self::RuleViolation,
        Self::CombatError,
        Self::CalculationError,
        Self::DataIntegrity,
        Self::Other,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StateCorruption => "state_corruption",
            Self::RuleViolation => "rule_violation",
            Self::CombatError => "combat_error",
            Self::CalculationError => "calculation_error",
            Self::DataIntegrity => "data_integrity",
            Self::Other => "other",
        }
    }

    /// Parse a stored or configured label. Unknown labels map to `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── built-in tables ────────────────────

/// Defect types whose identity ignores action and phase.
const BUILTIN_STRUCTURAL: &[&str] = &[
    "duplicate_ids",
    "zombie_creature",
    "hp_underflow",
    "negative_attack",
    "missing_field",
    "missing_owner",
    "conflicting_flags",
    "orphan_card",
    "invalid_zone",
    "invalid_card_reference",
    "hand_overflow",
];

const BUILTIN_CATEGORIES: &[(&str, DefectCategory)] = &[
    ("duplicate_ids", DefectCategory::StateCorruption),
    ("zombie_creature", DefectCategory::StateCorruption),
    ("conflicting_flags", DefectCategory::StateCorruption),
    ("orphan_card", DefectCategory::StateCorruption),
    ("invalid_zone", DefectCategory::StateCorruption),
    ("hand_overflow", DefectCategory::StateCorruption),
    ("summoning_sickness", DefectCategory::RuleViolation),
    ("lure_bypass", DefectCategory::RuleViolation),
    ("illegal_action", DefectCategory::RuleViolation),
    ("protection_bypass", DefectCategory::RuleViolation),
    ("frozen_attacker", DefectCategory::RuleViolation),
    ("invalid_attack_target", DefectCategory::CombatError),
    ("damage_not_applied", DefectCategory::CombatError),
    ("double_attack", DefectCategory::CombatError),
    ("hp_underflow", DefectCategory::CalculationError),
    ("negative_attack", DefectCategory::CalculationError),
    ("stat_mismatch", DefectCategory::CalculationError),
    ("missing_field", DefectCategory::DataIntegrity),
    ("missing_owner", DefectCategory::DataIntegrity),
    ("invalid_card_reference", DefectCategory::DataIntegrity),
];

// ──────────────────── taxonomy ────────────────────

/// Static classification tables, optionally extended from configuration.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    structural: HashSet<String>,
    categories: HashMap<String, DefectCategory>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            structural: BUILTIN_STRUCTURAL.iter().map(|t| (*t).to_string()).collect(),
            categories: BUILTIN_CATEGORIES
                .iter()
                .map(|(t, c)| ((*t).to_string(), *c))
                .collect(),
        }
    }
}

impl Taxonomy {
    /// Merge extra structural types and category mappings on top of the
    /// built-in tables. Later mappings replace built-in ones.
    pub fn with_overrides<S, C, K, V>(mut self, structural: S, categories: C) -> Result<Self>
    where
        S: IntoIterator<Item = K>,
        C: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for defect_type in structural {
            self.structural.insert(normalize_key(defect_type.as_ref()));
        }
        for (defect_type, label) in categories {
            let category = DefectCategory::from_label(label.as_ref()).ok_or_else(|| {
                DlError::InvalidConfig {
                    details: format!(
                        "taxonomy.categories.{} has unknown category {:?}",
                        defect_type.as_ref(),
                        label.as_ref()
                    ),
                }
            })?;
            self.categories
                .insert(normalize_key(defect_type.as_ref()), category);
        }
        Ok(self)
    }

    #[must_use]
    pub fn equivalence_mode(&self, defect_type: &str) -> EquivalenceMode {
        if self.structural.contains(&normalize_key(defect_type)) {
            EquivalenceMode::Structural
        } else {
            EquivalenceMode::Behavioral
        }
    }

    #[must_use]
    pub fn category_of(&self, defect_type: &str) -> DefectCategory {
        self.categories
            .get(&normalize_key(defect_type))
            .copied()
            .unwrap_or(DefectCategory::Other)
    }

    /// Structural defect types, sorted (for `config show`).
    pub fn structural_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.structural.iter().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

fn normalize_key(defect_type: &str) -> String {
    defect_type.trim().to_lowercase()
}
