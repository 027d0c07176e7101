//! Identity keys for records.
//!
//! Three schemes:
//! - content hash: SHA-256 over selected fields (aliases resolved), stable when items move around
//! - positional: the ordinal index, for inputs whose row order is stable
//! - column: an upstream key column, falling back to the ordinal index

use crate::models::{FieldSpec, IdentityKey, Record};
use sha2::{Digest, Sha256};

/// Joins hashed fields; cannot appear in trimmed text by accident.
const FIELD_SEPARATOR: char = '\u{1f}';

/// How a stage derives the identity key of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// Digest over the resolved values of the listed fields, in order
    ContentHash { fields: Vec<FieldSpec> },
    /// The record's ordinal index
    Positional,
    /// Value of a key column, or the ordinal index when it is blank
    Column { name: String },
}

impl Fingerprint {
    /// Content hash over plain columns.
    pub fn content_hash(fields: impl IntoIterator<Item = &'static str>) -> Self {
        Self::content_hash_of(fields.into_iter().map(FieldSpec::new))
    }

    /// Content hash over fields that accept alias columns.
    ///
    /// Use the same specs as the stage schema so every spelling of a field
    /// keys the record identically.
    pub fn content_hash_of(fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        Self::ContentHash {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn column(name: impl Into<String>) -> Self {
        Self::Column { name: name.into() }
    }

    /// Compute the key of a record. Pure: same input, same key.
    pub fn key(&self, record: &Record) -> IdentityKey {
        match self {
            Self::ContentHash { fields } => {
                let values: Vec<String> = fields.iter().map(|spec| spec.resolve(record)).collect();
                IdentityKey::new(content_digest(values.iter().map(String::as_str)))
            }
            Self::Positional => IdentityKey::from(record.index),
            Self::Column { name } => {
                let value = record.get(name).trim();
                if value.is_empty() {
                    IdentityKey::from(record.index)
                } else {
                    IdentityKey::new(value)
                }
            }
        }
    }
}

/// SHA-256 (lowercase hex) of the trimmed values joined by the unit separator.
pub fn content_digest<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(value.trim().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(index: usize, author: &str, text: &str) -> Record {
        Record::from_pairs(index, [("author_name", author), ("post_text", text)])
    }

    fn scheme() -> Fingerprint {
        Fingerprint::content_hash(["author_name", "post_text"])
    }

    #[test]
    fn test_content_hash_is_stable_across_positions() {
        let a = scheme().key(&post(0, "Ada", "New cable route survey"));
        let b = scheme().key(&post(17, "Ada", "New cable route survey"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a, scheme().key(&post(0, "Ada", "New cable route survey")));
    }

    #[test]
    fn test_content_hash_changes_with_any_character() {
        let base = scheme().key(&post(0, "Ada", "New cable route survey"));
        assert_ne!(base, scheme().key(&post(0, "Ada", "New cable route surveY")));
        assert_ne!(base, scheme().key(&post(0, "Ada", "New cable  route survey")));
        assert_ne!(base, scheme().key(&post(0, "Adb", "New cable route survey")));
    }

    #[test]
    fn test_content_hash_field_boundaries_matter() {
        let a = scheme().key(&post(0, "Ada-", "x"));
        let b = scheme().key(&post(0, "Ada", "-x"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_absent_and_empty_fields_are_the_same() {
        let absent = Record::from_pairs(0, [("post_text", "hello")]);
        let empty = post(0, "", "hello");
        assert_eq!(scheme().key(&absent), scheme().key(&empty));
    }

    #[test]
    fn test_aliased_fields_key_by_value() {
        let aliased = Fingerprint::content_hash_of([
            FieldSpec::new("author_name").aliases(&["author"]),
            FieldSpec::new("post_text").aliases(&["text"]),
        ]);
        let ada = Record::from_pairs(0, [("author", "Ada"), ("text", "Cable survey starts")]);
        let bob = Record::from_pairs(1, [("author", "Bob"), ("text", "Wind farm tender")]);
        assert_ne!(aliased.key(&ada), aliased.key(&bob));
        assert_eq!(aliased.key(&ada), aliased.key(&post(5, "Ada", "Cable survey starts")));
        assert_eq!(aliased.key(&ada), scheme().key(&post(0, "Ada", "Cable survey starts")));
    }

    #[test]
    fn test_positional_and_column_schemes() {
        let record = Record::from_pairs(4, [("item_id", " lead-9 ")]);
        assert_eq!(Fingerprint::Positional.key(&record).as_str(), "4");
        assert_eq!(Fingerprint::column("item_id").key(&record).as_str(), "lead-9");

        let blank = Record::from_pairs(7, [("item_id", "  ")]);
        assert_eq!(Fingerprint::column("item_id").key(&blank).as_str(), "7");
    }
}
