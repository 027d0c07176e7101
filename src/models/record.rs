//! Record, key and outcome types.
//!
//! These types carry the data through every stage: a `Record` comes in,
//! an `Outcome` keyed by its `IdentityKey` goes into the durable log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered mapping of column name to value, as read from / written to JSONL.
pub type Row = serde_json::Map<String, Value>;

/// One input item: its position in the dataset plus its named fields.
///
/// Immutable once read. Values are always strings; absent columns read as "".
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Ordinal position in the input dataset (0-based)
    pub index: usize,
    fields: Row,
}

impl Record {
    /// Build a record from a parsed JSON row.
    ///
    /// Non-string scalars are stringified, `null` is dropped (absent).
    pub fn from_row(index: usize, row: Row) -> Self {
        let fields = row
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k, Value::String(s))),
                other => Some((k, Value::String(other.to_string()))),
            })
            .collect();
        Self { index, fields }
    }

    /// Build a record from string pairs.
    pub fn from_pairs<K, V>(index: usize, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self { index, fields }
    }

    /// Field value, or "" when absent.
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Whether the column is present at all.
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All fields in input column order.
    pub fn fields(&self) -> &Row {
        &self.fields
    }
}

/// Deterministic dedup/resume key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<usize> for IdentityKey {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

/// Placeholder written when a prerequisite field is absent.
pub const MISSING: &str = "Missing";
/// Placeholder written when a lookup succeeded but found nothing.
pub const NOT_FOUND: &str = "Not found";
/// Placeholder written when the call producing a field failed.
pub const ERROR: &str = "Error";

/// Result of processing one record: output fields plus an optional error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub fields: Row,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any earlier value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.fields
            .insert(name.to_string(), Value::String(value.into()));
        self
    }

    /// Builder form of [`Outcome::set`].
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Field value, or "" when unset.
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Append an error description; several failed calls are joined with "; ".
    pub fn push_error(&mut self, error: impl fmt::Display) {
        let message = error.to_string();
        self.error = Some(match self.error.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}; {message}"),
            _ => message,
        });
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Fill every column that is still unset with `value`.
    pub fn fill_missing(&mut self, columns: &[&str], value: &str) {
        for column in columns {
            if !self.fields.contains_key(*column) {
                self.set(column, value);
            }
        }
    }
}

/// Counters for one stage run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name
    pub stage: String,

    /// Records in the input dataset
    pub total_records: usize,

    /// Records skipped because their key was already resumed
    pub skipped: usize,

    /// Records processed in this run
    pub processed: usize,

    /// Processed records whose outcome carries an error
    pub errored: usize,

    /// Processed records short-circuited on a missing prerequisite
    pub missing: usize,

    /// Snapshot files written
    pub snapshots: usize,

    /// External calls issued
    pub external_calls: u64,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Processed records per hour
    pub throughput_per_hour: f64,
}

impl StageReport {
    pub fn new(stage: &str, total_records: usize) -> Self {
        Self {
            stage: stage.to_string(),
            total_records,
            ..Default::default()
        }
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.processed as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_stringifies_scalars_and_drops_nulls() {
        let row = json!({"post_text": "hello", "likes": 12, "company_name": null, "ok": true});
        let record = Record::from_row(3, row.as_object().unwrap().clone());
        assert_eq!(record.index, 3);
        assert_eq!(record.get("likes"), "12");
        assert_eq!(record.get("ok"), "true");
        assert!(!record.has("company_name"));
        assert_eq!(record.get("company_name"), "");
    }

    #[test]
    fn test_outcome_error_accumulates() {
        let mut outcome = Outcome::new().with("website", NOT_FOUND);
        assert!(!outcome.is_error());
        outcome.push_error("search failed");
        outcome.push_error("theme timed out");
        assert_eq!(
            outcome.error.as_deref(),
            Some("search failed; theme timed out")
        );
        assert!(outcome.is_error());
    }

    #[test]
    fn test_outcome_fill_missing_keeps_existing() {
        let mut outcome = Outcome::new().with("website", "https://acme.test");
        outcome.fill_missing(&["website", "location"], ERROR);
        assert_eq!(outcome.get("website"), "https://acme.test");
        assert_eq!(outcome.get("location"), ERROR);
    }

    #[test]
    fn test_outcome_serialization_omits_empty_error() {
        let outcome = Outcome::new().with("theme", "PIPELINES");
        let line = serde_json::to_string(&outcome).unwrap();
        assert_eq!(line, r#"{"fields":{"theme":"PIPELINES"}}"#);
        let back: Outcome = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert!(back.fields.is_empty());
        assert_eq!(back.error.as_deref(), Some("boom"));
    }
}
