//! Append-only durable log and its marker file.
//!
//! Log format (JSON Lines):
//! - line 1: `{"kind":"header","stage":..,"columns":[..],"created_at":..}`
//! - then one `{"kind":"entry","key":..,"fields":{..},"error":..}` per processed record
//!
//! Entries are never rewritten. The same key may appear several times; readers
//! keep the last one. The marker file lists keys only and is written after the
//! log entry, so it never names a key the log does not have.

use crate::models::{IdentityKey, Outcome, Result, Row, SiftError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// First line of every log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogHeader {
    pub stage: String,
    pub columns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One processed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: IdentityKey,

    /// Outcome columns; columns added by later schema versions may be absent
    #[serde(default)]
    pub fields: Row,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Run that produced the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_at: Option<DateTime<Utc>>,
}

impl LogEntry {
    pub fn new(key: IdentityKey, outcome: Outcome, run_id: Uuid) -> Self {
        Self {
            key,
            fields: outcome.fields,
            error: outcome.error,
            run_id: Some(run_id),
            logged_at: Some(Utc::now()),
        }
    }

    /// The outcome carried by this entry.
    pub fn outcome(&self) -> Outcome {
        Outcome {
            fields: self.fields.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogLine {
    Header(LogHeader),
    Entry(LogEntry),
}

/// Append-only JSONL log of processed records.
#[derive(Debug, Clone)]
pub struct DurableLog {
    path: PathBuf,
    stage: String,
    columns: Vec<String>,
}

impl DurableLog {
    pub fn new(path: &Path, stage: &str, columns: &[&str]) -> Self {
        Self {
            path: path.to_path_buf(),
            stage: stage.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Outcome columns of this stage.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Create the log with its header if it does not exist yet.
    ///
    /// Idempotent: an existing log is left untouched. Returns whether the file
    /// was created.
    pub fn initialize(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SiftError::io("creating log directory", e))?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "Durable log already exists");
                return Ok(false);
            }
            Err(e) => return Err(SiftError::io("creating durable log", e)),
        };

        let header = LogLine::Header(LogHeader {
            stage: self.stage.clone(),
            columns: self.columns.clone(),
            created_at: Utc::now(),
        });
        let mut line = serde_json::to_string(&header)
            .map_err(|e| SiftError::Internal(format!("Serializing log header: {e}")))?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| SiftError::io("writing log header", e))?;

        info!(path = %self.path.display(), stage = %self.stage, "Created durable log");
        Ok(true)
    }

    /// Append one entry as a single write.
    ///
    /// A torn last line left by a crash is sealed with a newline first, so it
    /// stays an isolated unparseable line instead of corrupting this entry.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let json = serde_json::to_string(&LogLine::Entry(entry.clone()))
            .map_err(|e| SiftError::Internal(format!("Serializing log entry: {e}")))?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| SiftError::io("opening durable log", e))?;

        let mut buf = String::with_capacity(json.len() + 2);
        if !ends_with_newline(&mut file).map_err(|e| SiftError::io("inspecting log tail", e))? {
            warn!(path = %self.path.display(), "Sealing torn line at end of durable log");
            buf.push('\n');
        }
        buf.push_str(&json);
        buf.push('\n');

        file.write_all(buf.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| SiftError::io("appending to durable log", e))?;
        Ok(())
    }

    /// Lazily iterate all entries in arrival order.
    ///
    /// Each call reopens the file. A missing log yields nothing.
    pub fn scan(&self) -> Result<LogScan> {
        let reader = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(SiftError::io("opening durable log", e)),
        };
        Ok(LogScan {
            reader,
            path: self.path.clone(),
            line_no: 0,
            buf: Vec::new(),
        })
    }

    /// Latest entry per key (keep-last).
    pub fn latest(&self) -> Result<HashMap<IdentityKey, LogEntry>> {
        let mut latest = HashMap::new();
        for entry in self.scan()? {
            latest.insert(entry.key.clone(), entry);
        }
        Ok(latest)
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Length of the file up to and including its last newline.
fn complete_lines_len(file: &mut File) -> std::io::Result<u64> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    Ok(bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |end| end as u64 + 1))
}

/// Iterator over log entries. Unparseable lines are skipped with a warning.
pub struct LogScan {
    reader: Option<BufReader<File>>,
    path: PathBuf,
    line_no: usize,
    buf: Vec<u8>,
}

impl Iterator for LogScan {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        let reader = self.reader.as_mut()?;
        loop {
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Durable log read failed");
                    return None;
                }
            }
            self.line_no += 1;

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogLine>(line) {
                Ok(LogLine::Entry(entry)) => return Some(entry),
                Ok(LogLine::Header(_)) => continue,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = self.line_no,
                        error = %e,
                        "Skipping unreadable log line"
                    );
                }
            }
        }
    }
}

/// Plain-text resume hint: one key per line.
#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys listed in the marker file.
    ///
    /// An unreadable marker reads as empty. An unterminated last line is a
    /// torn write and is ignored; it may be a prefix of a real key.
    pub fn load(&self) -> HashSet<IdentityKey> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashSet::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable marker file");
                return HashSet::new();
            }
        };
        let complete = content.rfind('\n').map_or("", |end| &content[..=end]);
        complete
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(IdentityKey::new)
            .collect()
    }

    /// Append one key. A torn last line left by a crash is cut off first.
    pub fn append(&self, key: &IdentityKey) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;
        if !ends_with_newline(&mut file)? {
            let keep = complete_lines_len(&mut file)?;
            warn!(path = %self.path.display(), "Dropping torn line at end of marker file");
            file.set_len(keep)?;
        }
        file.write_all(format!("{key}\n").as_bytes())
    }
}

/// The log/marker pair of one stage, written under an exclusive file lock.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    log: DurableLog,
    marker: MarkerFile,
    lock_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(log: DurableLog, marker: MarkerFile) -> Self {
        let mut lock_path = OsString::from(log.path().as_os_str());
        lock_path.push(".lock");
        Self {
            log,
            marker,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn log(&self) -> &DurableLog {
        &self.log
    }

    pub fn marker(&self) -> &MarkerFile {
        &self.marker
    }

    /// Durably record an entry: log first, then marker.
    ///
    /// A failed marker write is tolerated; a failed log write is not.
    pub fn record(&self, entry: &LogEntry) -> Result<()> {
        let _lock = self.lock()?;

        self.log.append(entry)?;
        if let Err(e) = self.marker.append(&entry.key) {
            warn!(
                key = %entry.key,
                path = %self.marker.path().display(),
                error = %e,
                "Marker write failed; key stays resumable through the log"
            );
        }
        Ok(())
    }

    /// Exclusive advisory lock, released when the returned handle drops.
    fn lock(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| SiftError::io("opening log lock", e))?;
        fs2::FileExt::lock_exclusive(&file).map_err(|e| SiftError::io("locking durable log", e))?;
        Ok(file)
    }
}
