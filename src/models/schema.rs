//! Per-stage optional-field schema.
//!
//! Each stage declares the fields it reads, the alternative column names it
//! accepts for them and the value used when none is present. The schema is
//! applied once when a record is ingested; processing code only sees the
//! resolved values.

use crate::models::Record;

/// Spreadsheet round-trips upstream leave these strings where a cell was empty.
const NULL_TOKENS: [&str; 3] = ["nan", "none", "null"];

/// One field a stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical name used by the stage
    pub name: &'static str,
    /// Other column names tried in order when `name` is blank
    pub aliases: &'static [&'static str],
    /// Value used when every candidate column is blank
    pub default: &'static str,
    /// Truncate the value to this many characters
    pub max_chars: Option<usize>,
}

impl FieldSpec {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            aliases: &[],
            default: "",
            max_chars: None,
        }
    }

    pub const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub const fn default_value(mut self, default: &'static str) -> Self {
        self.default = default;
        self
    }

    pub const fn max_chars(mut self, max: usize) -> Self {
        self.max_chars = Some(max);
        self
    }

    /// Value of this field in `record`: first non-blank candidate column, or the default.
    pub fn resolve(&self, record: &Record) -> String {
        let found = std::iter::once(self.name)
            .chain(self.aliases.iter().copied())
            .map(|column| clean_cell(record.get(column)))
            .find(|value| !value.is_empty());

        let value = found.unwrap_or_else(|| self.default.to_string());
        match self.max_chars {
            Some(max) => value.chars().take(max).collect(),
            None => value,
        }
    }
}

/// The fields one stage reads from its input records.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    pub fn new(fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Resolve every declared field of `record`.
    pub fn resolve(&self, record: &Record) -> ResolvedRecord {
        let values = self
            .fields
            .iter()
            .map(|spec| (spec.name, spec.resolve(record)))
            .collect();
        ResolvedRecord {
            index: record.index,
            values,
            source: record.clone(),
        }
    }
}

fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if NULL_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
    {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// A record after schema resolution.
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
    pub index: usize,
    values: Vec<(&'static str, String)>,
    source: Record,
}

impl ResolvedRecord {
    /// Resolved value of a declared field.
    ///
    /// Undeclared names fall through to the raw record.
    pub fn get(&self, name: &str) -> &str {
        self.values
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_else(|| self.source.get(name))
    }

    /// Whether a declared field resolved to a non-empty value.
    pub fn is_present(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    /// The record as read from the input dataset.
    pub fn source(&self) -> &Record {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FieldSchema {
        FieldSchema::new([
            FieldSpec::new("post_text")
                .aliases(&["content", "text"])
                .max_chars(5),
            FieldSpec::new("author_name").aliases(&["post_author"]),
            FieldSpec::new("theme").default_value("OTHER"),
        ])
    }

    #[test]
    fn test_aliases_are_tried_in_order() {
        let record = Record::from_pairs(0, [("text", "third"), ("content", "second")]);
        let resolved = schema().resolve(&record);
        assert_eq!(resolved.get("post_text"), "secon");
    }

    #[test]
    fn test_null_tokens_and_defaults() {
        let record = Record::from_pairs(
            1,
            [("author_name", " NaN "), ("post_author", "Ada"), ("extra", "x")],
        );
        let resolved = schema().resolve(&record);
        assert_eq!(resolved.get("author_name"), "Ada");
        assert_eq!(resolved.get("theme"), "OTHER");
        assert!(!resolved.is_present("post_text"));
        assert_eq!(resolved.get("extra"), "x");
        assert_eq!(resolved.index, 1);
    }
}
