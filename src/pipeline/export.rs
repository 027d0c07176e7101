//! Export stage: the scored snapshot as a pretty-printed JSON array.

use crate::checkpoint::write_atomic;
use crate::models::{Result, Row, SiftError};
use crate::pipeline::load_dataset;
use serde_json::Value;
use std::path::Path;
use tracing::info;

const MAX_VALUE_CHARS: usize = 50_000;
const PLACEHOLDER: &str = "N/A";

/// Trimmed and capped value, or the placeholder when empty.
pub fn export_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        trimmed.chars().take(MAX_VALUE_CHARS).collect()
    }
}

/// Convert `input` (JSONL) to a JSON array at `output`. Returns the row count.
///
/// Every row carries every column seen in the dataset.
pub fn run_export(input: &Path, output: &Path) -> Result<usize> {
    let records = load_dataset(input)?;

    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for name in record.fields().keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }

    let rows: Vec<Row> = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|name| (name.clone(), Value::String(export_value(record.get(name)))))
                .collect()
        })
        .collect();

    let json = serde_json::to_vec_pretty(&rows)
        .map_err(|e| SiftError::Internal(format!("Serializing export: {e}")))?;
    write_atomic(output, &json)?;

    info!(rows = rows.len(), columns = columns.len(), path = %output.display(), "Export written");
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_export_value() {
        assert_eq!(export_value("  "), "N/A");
        assert_eq!(export_value(" 84.0 "), "84.0");
        assert_eq!(export_value(&"y".repeat(60_000)).len(), MAX_VALUE_CHARS);
    }

    #[test]
    fn test_run_export_fills_absent_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scored.jsonl");
        std::fs::write(
            &input,
            "{\"company_name\":\"Acme\",\"score_global\":\"84.0\"}\n{\"company_name\":\"\",\"reasoning\":\"low\"}\n",
        )
        .unwrap();
        let output = dir.path().join("scored_clean.json");

        assert_eq!(run_export(&input, &output).unwrap(), 2);
        let rows: Vec<Row> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(rows[0]["reasoning"], "N/A");
        assert_eq!(rows[1]["company_name"], "N/A");
        assert_eq!(rows[1]["score_global"], "N/A");
        assert_eq!(
            rows[0].keys().collect::<Vec<_>>(),
            vec!["company_name", "score_global", "reasoning"]
        );
    }
}
