//! Subject extraction: find the game entity implicated by an occurrence.
//!
//! The detector attaches entity references under different keys depending on
//! which check fired, sometimes as a bare name and sometimes as an object with
//! a `name` field. Extraction probes a fixed, ordered list of candidate keys
//! through typed accessors and normalizes the first hit, so that every
//! spelling of the same entity yields one canonical subject id.

#![allow(missing_docs)]

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Sentinel subject when no candidate key yields an entity.
pub const NO_SUBJECT: &str = "NO_CARD";

/// Candidate keys, in priority order.
pub const SUBJECT_KEYS: &[&str] = &["creature", "card", "attacker", "target", "cardName"];

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Typed view of a candidate value in the details payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectRef<'a> {
    /// A bare entity name: `{"creature": "Black Swan"}`.
    Name(&'a str),
    /// An entity object: `{"target": {"name": "Orca", ...}}`.
    Named { name: &'a str },
}

impl<'a> SubjectRef<'a> {
    pub const fn raw_name(&self) -> &'a str {
        match *self {
            Self::Name(name) | Self::Named { name } => name,
        }
    }

    /// Canonical subject id for this reference.
    pub fn normalized(&self) -> String {
        normalize_subject(self.raw_name())
    }
}

type Accessor = for<'a> fn(&'a Value) -> Option<SubjectRef<'a>>;

/// Accessors tried, in order, against each candidate value.
const ACCESSORS: &[Accessor] = &[as_bare_name, as_named_object];

fn as_bare_name(value: &Value) -> Option<SubjectRef<'_>> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(SubjectRef::Name)
}

fn as_named_object(value: &Value) -> Option<SubjectRef<'_>> {
    value
        .as_object()?
        .get("name")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|name| SubjectRef::Named { name })
}

/// First candidate reference present in `details`, if any.
pub fn find_subject_ref(details: &Map<String, Value>) -> Option<SubjectRef<'_>> {
    SUBJECT_KEYS.iter().find_map(|key| {
        let value = details.get(*key)?;
        ACCESSORS.iter().find_map(|accessor| accessor(value))
    })
}

/// Normalized subject id, or [`NO_SUBJECT`] when nothing is implicated.
pub fn extract_subject(details: &Map<String, Value>) -> String {
    find_subject_ref(details).map_or_else(|| NO_SUBJECT.to_string(), |r| r.normalized())
}

/// Lowercase and replace every whitespace run with a single underscore.
pub fn normalize_subject(raw: &str) -> String {
    WHITESPACE_RUN
        .replace_all(&raw.to_lowercase(), "_")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn bare_string_is_normalized() {
        let d = details(json!({"creature": "Black Swan"}));
        assert_eq!(extract_subject(&d), "black_swan");
    }

    #[test]
    fn prenormalized_input_is_stable() {
        let a = details(json!({"creature": "Black Swan"}));
        let b = details(json!({"creature": "black_swan"}));
        assert_eq!(extract_subject(&a), extract_subject(&b));
        assert_eq!(normalize_subject("black_swan"), "black_swan");
    }

    #[test]
    fn named_object_uses_name_field() {
        let a = details(json!({"creature": "Orca"}));
        let b = details(json!({"target": {"name": "Orca", "hp": -2}}));
        assert_eq!(extract_subject(&a), "orca");
        assert_eq!(extract_subject(&b), "orca");
    }

    #[test]
    fn candidate_order_is_respected() {
        let d = details(json!({"target": "Orca", "attacker": "Mako", "card": "Kelp Wall"}));
        assert_eq!(extract_subject(&d), "kelp_wall");
    }

    #[test]
    fn camel_case_card_name_key_is_probed() {
        let d = details(json!({"cardName": "Tide  Caller"}));
        assert_eq!(extract_subject(&d), "tide_caller");
    }

    #[test]
    fn empty_and_unusable_candidates_are_skipped() {
        let d = details(json!({
            "creature": "",
            "card": {"id": 7},
            "attacker": 42,
            "target": {"name": "Reef Shark"}
        }));
        assert_eq!(extract_subject(&d), "reef_shark");
    }

    #[test]
    fn missing_subject_yields_sentinel() {
        assert_eq!(extract_subject(&Map::new()), NO_SUBJECT);
        let d = details(json!({"zone": "graveyard", "count": 3}));
        assert_eq!(extract_subject(&d), NO_SUBJECT);
    }

    #[test]
    fn whitespace_runs_collapse_to_single_underscore() {
        assert_eq!(normalize_subject("Great\t\tWhite  Shark"), "great_white_shark");
        assert_eq!(normalize_subject(" Eel "), "_eel_");
    }

    #[test]
    fn subject_ref_reports_shape() {
        let d = details(json!({"attacker": {"name": "Mako"}}));
        assert_eq!(find_subject_ref(&d), Some(SubjectRef::Named { name: "Mako" }));
        let d = details(json!({"attacker": "Mako"}));
        assert_eq!(find_subject_ref(&d), Some(SubjectRef::Name("Mako")));
    }
}
