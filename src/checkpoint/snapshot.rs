//! Output snapshots: input dataset joined with the latest outcome per key.
//!
//! A snapshot is rebuilt from scratch every time and replaces the previous
//! one through write-to-temp-then-rename, so readers never see a partial file.

use crate::checkpoint::{DurableLog, Fingerprint, LogEntry};
use crate::models::{IdentityKey, Record, Result, Row, SiftError};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column every joined row carries.
pub const ERROR_COLUMN: &str = "error";

/// Numeric descending order on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOrder {
    pub column: String,
}

impl SnapshotOrder {
    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

/// Summary of one snapshot write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Rows written (= input records)
    pub rows: usize,
    /// Rows that had a log entry
    pub matched: usize,
}

/// Writes the output snapshot of a stage.
#[derive(Debug)]
pub struct SnapshotWriter {
    output: PathBuf,
    order: Option<SnapshotOrder>,
    writes: usize,
}

impl SnapshotWriter {
    pub fn new(output: &Path, order: Option<SnapshotOrder>) -> Self {
        Self {
            output: output.to_path_buf(),
            order,
            writes: 0,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Number of snapshots written by this writer.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Fail early if the snapshot location cannot be written.
    pub fn ensure_writable(&self) -> Result<()> {
        let probe = temp_path(&self.output);
        create_parent(&self.output)?;
        File::create(&probe).map_err(|e| SiftError::io("probing output location", e))?;
        fs::remove_file(&probe).map_err(|e| SiftError::io("removing output probe", e))?;
        Ok(())
    }

    /// Rebuild the snapshot from the full log and the input dataset.
    pub fn snapshot(
        &mut self,
        input: &[Record],
        fingerprint: &Fingerprint,
        log: &DurableLog,
    ) -> Result<SnapshotStats> {
        let latest = log.latest()?;
        let (rows, matched) = merge(input, fingerprint, &latest, log.columns());
        let rows = match &self.order {
            Some(order) => sort_descending(rows, &order.column),
            None => rows,
        };

        write_jsonl_atomic(&self.output, &rows)?;
        self.writes += 1;

        debug!(
            path = %self.output.display(),
            rows = rows.len(),
            matched,
            write = self.writes,
            "Snapshot written"
        );
        Ok(SnapshotStats {
            rows: rows.len(),
            matched,
        })
    }
}

/// Left-join the input onto the latest outcome per key.
///
/// Outcome fields override same-named input columns. Every row gets all stage
/// columns plus `error`, empty when the record has no entry yet.
pub fn merge(
    input: &[Record],
    fingerprint: &Fingerprint,
    latest: &HashMap<IdentityKey, LogEntry>,
    columns: &[String],
) -> (Vec<Row>, usize) {
    let mut matched = 0;
    let rows = input
        .iter()
        .map(|record| {
            let mut row = record.fields().clone();
            for column in columns.iter().map(String::as_str).chain([ERROR_COLUMN]) {
                row.entry(column.to_string())
                    .or_insert_with(|| Value::String(String::new()));
            }
            if let Some(entry) = latest.get(&fingerprint.key(record)) {
                matched += 1;
                for column in columns {
                    row.insert(column.clone(), Value::String(String::new()));
                }
                for (name, value) in &entry.fields {
                    row.insert(name.clone(), value.clone());
                }
                row.insert(
                    ERROR_COLUMN.to_string(),
                    Value::String(entry.error.clone().unwrap_or_default()),
                );
            }
            row
        })
        .collect();
    (rows, matched)
}

/// Stable sort by a numeric column, largest first; unparseable values last.
fn sort_descending(mut rows: Vec<Row>, column: &str) -> Vec<Row> {
    let number = |row: &Row| -> Option<f64> {
        match row.get(column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    rows.sort_by(|a, b| match (number(a), number(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    rows
}

/// Write rows as JSON Lines, atomically.
pub fn write_jsonl_atomic(path: &Path, rows: &[Row]) -> Result<()> {
    let mut buf = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut buf, row)
            .map_err(|e| SiftError::Internal(format!("Serializing row: {e}")))?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}

/// Replace `path` with `data`: write a sibling temp file, fsync, rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    create_parent(path)?;
    let temp = temp_path(path);
    {
        let file = File::create(&temp).map_err(|e| SiftError::io("creating temp output", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(data)
            .map_err(|e| SiftError::io("writing temp output", e))?;
        let file = writer
            .into_inner()
            .map_err(|e| SiftError::io("flushing temp output", e.into_error()))?;
        file.sync_all()
            .map_err(|e| SiftError::io("syncing temp output", e))?;
    }
    fs::rename(&temp, path).map_err(|e| SiftError::io("renaming output into place", e))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    PathBuf::from(temp)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SiftError::io("creating output directory", e))?;
    }
    Ok(())
}
