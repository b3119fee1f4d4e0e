//! Per-unit outcomes of a batch operation.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Result of one unit of work (a file write, a clone or a branch commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success { success: bool },
    Failure { error: String },
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success { success: true }
    }

    pub fn failure(error: impl Display) -> Self {
        Outcome::Failure {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { success: true })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failure { error } => Some(error),
            Outcome::Success { .. } => None,
        }
    }
}

impl<E: Display> From<std::result::Result<(), E>> for Outcome {
    fn from(result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => Outcome::success(),
            Err(err) => Outcome::failure(err),
        }
    }
}

/// Outcomes keyed by file path or branch directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    entries: BTreeMap<String, Outcome>,
}

/// Report returned by a bulk edit.
pub type EditReport = Report;

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, outcome: Outcome) {
        self.entries.insert(key.into(), outcome);
    }

    pub fn get(&self, key: &str) -> Option<&Outcome> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Outcome)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcomes_serialize_to_wire_shapes() {
        let mut report = Report::new();
        report.record("acme/svc/main/.github/workflows/ci.yml", Outcome::success());
        report.record("/srv/acme/svc/main", Outcome::failure("push rejected"));
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "acme/svc/main/.github/workflows/ci.yml": {"success": true},
                "/srv/acme/svc/main": {"error": "push rejected"},
            })
        );
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn outcome_from_result() {
        let ok: Outcome = Ok::<(), String>(()).into();
        assert!(ok.is_success());
        let err: Outcome = Err::<(), _>("disk full").into();
        assert_eq!(err.error(), Some("disk full"));
    }

    #[test]
    fn deserializes_both_variants() {
        let report: Report =
            serde_json::from_value(json!({"a": {"success": true}, "b": {"error": "x"}})).unwrap();
        assert!(report.get("a").unwrap().is_success());
        assert!(!report.get("b").unwrap().is_success());
    }
}
