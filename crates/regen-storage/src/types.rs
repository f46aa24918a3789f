//! Storage-layer record and query types.
//!
//! Records are schemaless JSON documents. The typed models live in
//! regen-core; the store only needs to compare top-level fields for
//! [`Criteria`] filtering.

use serde_json::{Map, Value};

/// A stored document. Always a JSON object in practice.
pub type Record = Value;

/// Exact-match filter over top-level record fields.
///
/// A record matches when every `(field, value)` pair in the criteria is
/// present in the record with an equal value. Empty criteria match
/// everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria(Map<String, Value>);

impl Criteria {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Criteria(Map::new())
    }

    /// Adds a required `field == value` pair.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Returns true if `record` satisfies every pair in this filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

/// Applies optional criteria to a record.
pub(crate) fn admits(criteria: Option<&Criteria>, record: &Record) -> bool {
    criteria.map_or(true, |c| c.matches(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_criteria_match_everything() {
        assert!(Criteria::new().matches(&json!({"a": 1})));
        assert!(admits(None, &json!({"a": 1})));
    }

    #[test]
    fn exact_match_on_fields() {
        let c = Criteria::new().with("kind", "markdown");
        assert!(c.matches(&json!({"kind": "markdown", "digest": "d"})));
        assert!(!c.matches(&json!({"kind": "markdown-ext"})));
        assert!(!c.matches(&json!({"digest": "d"})));
    }

    #[test]
    fn null_is_a_value_not_absence() {
        let c = Criteria::new().with("kind", Value::Null);
        assert!(c.matches(&json!({"kind": null})));
        assert!(!c.matches(&json!({})));
    }
}
