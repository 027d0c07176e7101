//! Whole stage runs against the files a crashed or edited run leaves behind.

use async_trait::async_trait;
use serde_json::Value;
use siftline::checkpoint::{Fingerprint, content_digest};
use siftline::client::CallExecutor;
use siftline::models::{
    CallError, EngineConfig, FieldSchema, FieldSpec, MISSING, Outcome, PacingConfig,
    ResolvedRecord,
};
use siftline::pipeline::{StageDriver, StageOptions, StagePaths, StagePlugin};
use std::fs::{self, OpenOptions};
use std::io::Write;
use tempfile::TempDir;

/// Reverses `title` through one executor call.
struct Reverse;

#[async_trait]
impl StagePlugin for Reverse {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::content_hash(["title"])
    }

    fn schema(&self) -> FieldSchema {
        FieldSchema::new([FieldSpec::new("title")])
    }

    fn columns(&self) -> &'static [&'static str] {
        &["reversed"]
    }

    fn prerequisites(&self, record: &ResolvedRecord) -> Option<Outcome> {
        if record.is_present("title") {
            return None;
        }
        let mut outcome = Outcome::new().with("reversed", MISSING);
        outcome.push_error("Missing essential fields");
        Some(outcome)
    }

    async fn process(&mut self, record: &ResolvedRecord, executor: &CallExecutor) -> Outcome {
        let title = record.get("title").to_string();
        match executor
            .call("reverse", async move {
                Ok::<_, CallError>(title.chars().rev().collect::<String>())
            })
            .await
        {
            Ok(reversed) => Outcome::new().with("reversed", reversed),
            Err(e) => {
                let mut outcome = Outcome::new().with("reversed", "Error");
                outcome.push_error(e);
                outcome
            }
        }
    }
}

const TITLES: [&str; 3] = [
    r#"{"title":"abc"}"#,
    r#"{"title":"xyz"}"#,
    r#"{"title":"pqr","extra":1}"#,
];

fn paths(dir: &TempDir) -> StagePaths {
    StagePaths {
        input: dir.path().join("in.jsonl"),
        output: dir.path().join("out.jsonl"),
        log: dir.path().join("logs/log_reverse.jsonl"),
        marker: dir.path().join("logs/log_reverse.txt"),
    }
}

fn driver(dir: &TempDir) -> StageDriver<Reverse> {
    fs::write(dir.path().join("in.jsonl"), TITLES.join("\n")).unwrap();
    let engine = EngineConfig {
        batch_size: 2,
        call_timeout_secs: 5,
    };
    StageDriver::new(Reverse, paths(dir), &engine, PacingConfig::none())
}

fn output(dir: &TempDir) -> Vec<Value> {
    fs::read_to_string(dir.path().join("out.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_torn_log_tail_is_sealed_on_resume() {
    let dir = TempDir::new().unwrap();
    let first = driver(&dir)
        .run(&StageOptions {
            limit: Some(1),
            show_progress: false,
        })
        .await
        .unwrap();
    assert_eq!(first.processed, 1);

    // Crash in the middle of an append.
    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("logs/log_reverse.jsonl"))
        .unwrap();
    log.write_all(br#"{"kind":"entry","key":"dead"#).unwrap();
    drop(log);

    let second = driver(&dir).run(&StageOptions::default()).await.unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(second.processed, 2);

    let rows = output(&dir);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["reversed"], "cba");
    assert_eq!(rows[1]["reversed"], "zyx");
    assert_eq!(rows[2]["reversed"], "rqp");
    assert_eq!(rows[2]["extra"], "1");
    assert!(rows.iter().all(|row| row["error"] == ""));
}

#[tokio::test]
async fn test_deleted_marker_file_still_resumes_from_log() {
    let dir = TempDir::new().unwrap();
    driver(&dir).run(&StageOptions::default()).await.unwrap();
    let before = output(&dir);

    fs::remove_file(dir.path().join("logs/log_reverse.txt")).unwrap();
    let mut again = driver(&dir);
    let report = again.run(&StageOptions::default()).await.unwrap();
    assert_eq!(report.skipped, 3);
    assert_eq!(report.processed, 0);
    assert_eq!(again.executor().calls(), 0);
    assert_eq!(output(&dir), before);
}

#[tokio::test]
async fn test_marker_key_skips_record_without_outcome() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("logs")).unwrap();
    fs::write(
        dir.path().join("logs/log_reverse.txt"),
        format!("{}\n", content_digest(["xyz"])),
    )
    .unwrap();

    let report = driver(&dir).run(&StageOptions::default()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 2);

    let rows = output(&dir);
    assert_eq!(rows[0]["reversed"], "cba");
    assert_eq!(rows[1]["reversed"], "");
    assert_eq!(rows[2]["reversed"], "rqp");
}
