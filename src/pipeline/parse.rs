//! Defensive parsing of model output.
//!
//! Model replies are free text that usually contains what was asked for.
//! Nothing here fails: unparseable replies give empty values and a warning.

use crate::models::Row;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

static LABEL_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\n[A-Za-z_]+:").ok());
static INTEGER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());
static SENTENCE_END: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[.!?]\s").ok());

/// Parse the JSON object spanning the first `{` to the last `}`.
pub fn parse_json_object(text: &str) -> Row {
    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            warn!(reply = %preview(text), "No JSON object in model reply");
            return Row::new();
        }
    };
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(row)) => row,
        Ok(_) => Row::new(),
        Err(e) => {
            warn!(error = %e, reply = %preview(text), "Model reply JSON did not parse");
            Row::new()
        }
    }
}

/// String value of a parsed key, with non-string scalars stringified.
pub fn json_field(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Value after `LABEL:` up to the next line starting with a label, or the end.
///
/// The label match is case-insensitive.
pub fn extract_field(text: &str, label: &str) -> String {
    let Ok(re) = Regex::new(&format!(r"(?i){}:\s*", regex::escape(label))) else {
        return String::new();
    };
    let Some(found) = re.find(text) else {
        return String::new();
    };
    let rest = &text[found.end()..];
    // At least one character belongs to the value.
    let skip = rest.chars().next().map_or(0, char::len_utf8);
    let end = LABEL_LINE
        .as_ref()
        .and_then(|label_line| label_line.find(&rest[skip..]))
        .map_or(rest.len(), |m| skip + m.start());
    rest[..end].trim().to_string()
}

/// First integer in `text`, or 0.
pub fn first_integer(text: &str) -> u32 {
    INTEGER
        .as_ref()
        .and_then(|re| re.find(text))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// First integer of a labelled field, or 0.
pub fn extract_score(text: &str, label: &str) -> u32 {
    first_integer(&extract_field(text, label))
}

/// First sentence of `text`, capped to `max_words` words.
pub fn enforce_one_sentence(text: &str, max_words: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let first = match SENTENCE_END.as_ref().and_then(|re| re.find(&collapsed)) {
        Some(m) => &collapsed[..m.start() + 1],
        None => collapsed.as_str(),
    };
    let words: Vec<&str> = first.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}.", words[..max_words].join(" ").trim_end_matches('.'))
    } else {
        first.to_string()
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
