//! Input datasets (JSON Lines, one flat object per record).

use crate::models::{Record, Result, SiftError};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Load a JSONL dataset. Any unreadable or non-object line fails the load.
pub fn load_dataset(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| SiftError::io("opening input dataset", e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| SiftError::io("reading input dataset", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| {
            SiftError::ParseError(format!("{}:{}: {}", path.display(), line_num + 1, e))
        })?;
        let Value::Object(row) = value else {
            return Err(SiftError::InvalidInput(format!(
                "{}:{}: expected a JSON object",
                path.display(),
                line_num + 1
            )));
        };
        records.push(Record::from_row(records.len(), row));
    }

    info!(path = %path.display(), count = records.len(), "Loaded dataset");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_dataset_assigns_contiguous_indices() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.jsonl");
        std::fs::write(
            &path,
            "{\"post_text\":\"a\"}\n\n{\"post_text\":\"b\",\"likes\":3}\n",
        )
        .unwrap();

        let records = load_dataset(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].index, 1);
        assert_eq!(records[1].get("likes"), "3");
    }

    #[test]
    fn test_load_dataset_rejects_bad_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.jsonl");
        std::fs::write(&path, "{\"ok\":1}\n[1,2]\n").unwrap();
        assert!(matches!(load_dataset(&path), Err(SiftError::InvalidInput(_))));

        std::fs::write(&path, "{\"ok\":1}\n{broken\n").unwrap();
        assert!(matches!(load_dataset(&path), Err(SiftError::ParseError(_))));

        assert!(matches!(
            load_dataset(&dir.path().join("missing.jsonl")),
            Err(SiftError::Io { .. })
        ));
    }
}
