//! Cleaning stage: normalizes post text and drops job offers and duplicates.

use crate::checkpoint::write_jsonl_atomic;
use crate::models::{Result, Row};
use crate::pipeline::load_dataset;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

const MAX_TEXT_CHARS: usize = 100_000;

/// Applied in order: URLs, mentions, hashtags, non-ASCII, punctuation.
static NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"http\S+", r"@[A-Za-z0-9_]+", r"#\S+", r"[^\x00-\x7F]+", r"[^\w\s]"]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Counters of one cleaning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub job_posts_dropped: usize,
    pub duplicates_dropped: usize,
}

/// Normalize post text for the model stages.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = text.to_string();
    for re in NOISE.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned.to_lowercase().trim().chars().take(MAX_TEXT_CHARS).collect()
}

/// Clean `input` into `output`.
pub fn run_clean(input: &Path, output: &Path) -> Result<CleanReport> {
    let records = load_dataset(input)?;
    let mut report = CleanReport {
        input_rows: records.len(),
        ..CleanReport::default()
    };
    let mut seen = HashSet::new();
    let mut rows: Vec<Row> = Vec::with_capacity(records.len());

    for record in &records {
        if record.get("is_job_post").eq_ignore_ascii_case("true") {
            report.job_posts_dropped += 1;
            continue;
        }
        let post_id = record.get("post_id").trim();
        if !post_id.is_empty() && !seen.insert(post_id.to_string()) {
            report.duplicates_dropped += 1;
            continue;
        }
        let mut row = record.fields().clone();
        row.insert(
            "post_text".to_string(),
            Value::String(clean_text(record.get("post_text"))),
        );
        rows.push(row);
    }

    write_jsonl_atomic(output, &rows)?;
    report.output_rows = rows.len();
    info!(
        input = report.input_rows,
        output = report.output_rows,
        job_posts = report.job_posts_dropped,
        duplicates = report.duplicates_dropped,
        path = %output.display(),
        "Cleaned dataset written"
    );
    Ok(report)
}
