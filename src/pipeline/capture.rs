//! Capture stage: normalizes harvested posts and keys them by content.
//!
//! The browser collaborator has already read the posts, so this stage makes
//! no external calls. Its durable log is what lets a harvest be re-run
//! without producing the same post twice.

use crate::checkpoint::Fingerprint;
use crate::client::CallExecutor;
use crate::models::{FieldSchema, FieldSpec, MISSING, Outcome, ResolvedRecord};
use crate::pipeline::StagePlugin;
use async_trait::async_trait;

/// Label fragments marking a job offer.
const JOB_LABELS: [&str; 2] = ["emploi", "job offer"];

const COLUMNS: &[&str] = &[
    "post_id",
    "post_text",
    "post_url",
    "author_name",
    "author_role",
    "profile_url",
    "city",
    "country",
    "keyword",
    "is_job_post",
];

const POST_TEXT: FieldSpec = FieldSpec::new("post_text").aliases(&["text", "content"]);
const AUTHOR_NAME: FieldSpec = FieldSpec::new("author_name").aliases(&["author", "name"]);

/// Fields copied to the outcome as resolved.
const PASSTHROUGH: &[&str] = &[
    "post_text",
    "post_url",
    "author_name",
    "author_role",
    "profile_url",
    "city",
    "country",
    "keyword",
];

#[derive(Debug, Default)]
pub struct CapturePlugin;

impl CapturePlugin {
    pub fn new() -> Self {
        Self
    }

    fn post_id(&self, record: &ResolvedRecord) -> String {
        self.fingerprint().key(record.source()).to_string()
    }
}

/// Whether a harvested post is a job offer rather than a project post.
pub fn is_job_post(labels: &str, post_url: &str) -> bool {
    let labels = labels.to_lowercase();
    JOB_LABELS.iter().any(|label| labels.contains(label)) || post_url.contains("/jobs/")
}

#[async_trait]
impl StagePlugin for CapturePlugin {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::content_hash_of([AUTHOR_NAME, POST_TEXT])
    }

    fn schema(&self) -> FieldSchema {
        FieldSchema::new([
            POST_TEXT,
            FieldSpec::new("post_url").aliases(&["url", "link"]),
            AUTHOR_NAME,
            FieldSpec::new("author_role").aliases(&["role"]),
            FieldSpec::new("profile_url"),
            FieldSpec::new("city"),
            FieldSpec::new("country"),
            FieldSpec::new("keyword").aliases(&["hashtag"]),
            FieldSpec::new("labels"),
        ])
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn prerequisites(&self, record: &ResolvedRecord) -> Option<Outcome> {
        if record.is_present("post_text") {
            return None;
        }
        let mut outcome = Outcome::new().with("post_id", self.post_id(record));
        outcome.fill_missing(PASSTHROUGH, MISSING);
        outcome.set("is_job_post", "false");
        outcome.push_error("Missing essential fields");
        Some(outcome)
    }

    async fn process(&mut self, record: &ResolvedRecord, _executor: &CallExecutor) -> Outcome {
        let mut outcome = Outcome::new().with("post_id", self.post_id(record));
        for field in PASSTHROUGH {
            outcome.set(field, record.get(field));
        }
        let job = is_job_post(record.get("labels"), record.get("post_url"));
        outcome.set("is_job_post", job.to_string());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineConfig, PacingConfig, Record};
    use crate::pipeline::{StageDriver, StageOptions, StagePaths};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_is_job_post() {
        assert!(is_job_post("Offre d'emploi", ""));
        assert!(is_job_post("", "https://www.linkedin.com/jobs/view/1"));
        assert!(!is_job_post("Promoted", "https://www.linkedin.com/feed/update/1"));
    }

    #[tokio::test]
    async fn test_process_normalizes_aliases() {
        let mut plugin = CapturePlugin::new();
        let record = Record::from_pairs(
            0,
            [
                ("text", "  Cable route survey starts next month "),
                ("author", "Ada"),
                ("labels", "emploi"),
            ],
        );
        let resolved = plugin.schema().resolve(&record);
        assert!(plugin.prerequisites(&resolved).is_none());

        let executor = CallExecutor::new(Duration::from_secs(1), PacingConfig::none());
        let outcome = plugin.process(&resolved, &executor).await;
        assert_eq!(outcome.get("post_text"), "Cable route survey starts next month");
        assert_eq!(outcome.get("author_name"), "Ada");
        assert_eq!(outcome.get("is_job_post"), "true");
        assert_eq!(outcome.get("post_id").len(), 64);
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn test_missing_text_short_circuits() {
        let plugin = CapturePlugin::new();
        let resolved = plugin
            .schema()
            .resolve(&Record::from_pairs(0, [("author_name", "Ada")]));
        let outcome = plugin.prerequisites(&resolved).unwrap();
        assert_eq!(outcome.get("post_text"), MISSING);
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn test_aliased_posts_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("harvest.jsonl");
        std::fs::write(
            &input,
            [
                r#"{"text":"Cable survey starts","author":"Ada"}"#,
                r#"{"text":"Wind farm tender","author":"Bob"}"#,
                r#"{"post_text":"Cable survey starts","author_name":"Ada"}"#,
            ]
            .join("\n"),
        )
        .unwrap();
        let paths = StagePaths {
            input,
            output: dir.path().join("captured.jsonl"),
            log: dir.path().join("log_01.jsonl"),
            marker: dir.path().join("log_01.txt"),
        };
        let engine = EngineConfig {
            batch_size: 50,
            call_timeout_secs: 5,
        };
        let mut driver =
            StageDriver::new(CapturePlugin::new(), paths, &engine, PacingConfig::none());

        let report = driver.run(&StageOptions::default()).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);

        let content = std::fs::read_to_string(dir.path().join("captured.jsonl")).unwrap();
        let rows: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows[0]["post_text"], "Cable survey starts");
        assert_eq!(rows[1]["post_text"], "Wind farm tender");
        assert_eq!(rows[1]["author_name"], "Bob");
        assert_ne!(rows[0]["post_id"], rows[1]["post_id"]);
        assert_eq!(rows[0]["post_id"], rows[2]["post_id"]);
    }
}
