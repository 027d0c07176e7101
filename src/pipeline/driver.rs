//! Stage driver: the checkpointed record loop shared by every stage.
//!
//! Per record:
//! Pending → Skipped (key already resumed)
//! Pending → Processing → Logged → SnapshotPending → Snapshotted
//!
//! The durable log is written before the key counts as done, so a crash at
//! any point loses at most the record in flight.

use crate::checkpoint::{
    CheckpointStore, DurableLog, Fingerprint, LogEntry, MarkerFile, ResumeIndex, SnapshotOrder,
    SnapshotWriter,
};
use crate::client::{CallExecutor, Pacer};
use crate::models::{
    Config, EngineConfig, FieldSchema, Outcome, PacingConfig, ResolvedRecord, Result, StageConfig,
    StageReport,
};
use crate::pipeline::load_dataset;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The work one stage does per record.
#[async_trait]
pub trait StagePlugin: Send {
    /// Stage name used in logs and the log header.
    fn name(&self) -> &'static str;

    /// How records are keyed for dedup and resume.
    fn fingerprint(&self) -> Fingerprint;

    /// Fields read from input records.
    fn schema(&self) -> FieldSchema;

    /// Outcome columns, in output order.
    fn columns(&self) -> &'static [&'static str];

    /// Deterministic outcome for a record that lacks required fields.
    ///
    /// Returning `Some` short-circuits the record: no external call is made.
    fn prerequisites(&self, record: &ResolvedRecord) -> Option<Outcome>;

    /// Process one record. Call failures end up in the outcome, never as `Err`.
    async fn process(&mut self, record: &ResolvedRecord, executor: &CallExecutor) -> Outcome;

    /// Row order of the output snapshot; input order when `None`.
    fn snapshot_order(&self) -> Option<SnapshotOrder> {
        None
    }
}

/// File locations of one stage run.
#[derive(Debug, Clone)]
pub struct StagePaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub marker: PathBuf,
}

impl StagePaths {
    /// Stage paths resolved against the configured data directory.
    pub fn resolve(config: &Config, stage: &StageConfig) -> Self {
        Self {
            input: config.resolve(&stage.input),
            output: config.resolve(&stage.output),
            log: config.resolve(&stage.log),
            marker: config.resolve(&stage.marker),
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    /// Process at most this many records in this run
    pub limit: Option<usize>,

    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

/// Runs one stage plug-in over its input dataset.
pub struct StageDriver<P: StagePlugin> {
    plugin: P,
    paths: StagePaths,
    batch_size: usize,
    executor: CallExecutor,
    pacer: Pacer,
    run_id: Uuid,
}

impl<P: StagePlugin> StageDriver<P> {
    pub fn new(plugin: P, paths: StagePaths, engine: &EngineConfig, pacing: PacingConfig) -> Self {
        Self {
            plugin,
            paths,
            batch_size: engine.batch_size.max(1),
            executor: CallExecutor::new(Duration::from_secs(engine.call_timeout_secs), pacing),
            pacer: Pacer::new(pacing),
            run_id: Uuid::new_v4(),
        }
    }

    /// Driver configured from the engine section and the stage's own section.
    pub fn from_config(plugin: P, config: &Config, stage: &StageConfig) -> Self {
        Self::new(
            plugin,
            StagePaths::resolve(config, stage),
            &config.engine,
            config.pacing_for(stage),
        )
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn executor(&self) -> &CallExecutor {
        &self.executor
    }

    /// Run the stage to completion (or to `options.limit` processed records).
    ///
    /// Setup failures return before any record is processed. After that only
    /// a failed log append or a failed final snapshot aborts the run.
    pub async fn run(&mut self, options: &StageOptions) -> Result<StageReport> {
        let start = Instant::now();
        let name = self.plugin.name();

        // Setup: everything that can fail before the first record.
        let input = load_dataset(&self.paths.input)?;
        let mut writer = SnapshotWriter::new(&self.paths.output, self.plugin.snapshot_order());
        writer.ensure_writable()?;

        let log = DurableLog::new(&self.paths.log, name, self.plugin.columns());
        log.initialize()?;
        let store = CheckpointStore::new(log, MarkerFile::new(&self.paths.marker));
        let mut resumed = ResumeIndex::load(&store)?;

        let fingerprint = self.plugin.fingerprint();
        let schema = self.plugin.schema();
        let mut report = StageReport::new(name, input.len());

        info!(
            stage = name,
            run_id = %self.run_id,
            records = input.len(),
            resumed = resumed.len(),
            batch_size = self.batch_size,
            limit = ?options.limit,
            "Starting stage"
        );

        let pb = progress_bar(input.len(), options.show_progress);
        let mut since_snapshot = 0;

        for record in &input {
            let key = fingerprint.key(record);
            if resumed.contains(&key) {
                report.skipped += 1;
                pb.inc(1);
                continue;
            }
            if options.limit.is_some_and(|limit| report.processed >= limit) {
                info!(stage = name, limit = ?options.limit, "Record limit reached");
                break;
            }

            self.executor.begin_record();
            let resolved = schema.resolve(record);
            let outcome = match self.plugin.prerequisites(&resolved) {
                Some(outcome) => {
                    report.missing += 1;
                    debug!(stage = name, index = record.index, %key, "Missing prerequisites");
                    outcome
                }
                None => {
                    let outcome = self.plugin.process(&resolved, &self.executor).await;
                    if outcome.is_error() {
                        report.errored += 1;
                        warn!(
                            stage = name,
                            index = record.index,
                            %key,
                            error = outcome.error.as_deref().unwrap_or_default(),
                            "Record processed with errors"
                        );
                    } else {
                        debug!(stage = name, index = record.index, %key, "Record processed");
                    }
                    outcome
                }
            };

            store.record(&LogEntry::new(key.clone(), outcome, self.run_id))?;
            resumed.insert(key);
            report.processed += 1;
            since_snapshot += 1;
            pb.inc(1);
            pb.set_message(format!(
                "processed: {}, errors: {}",
                report.processed, report.errored
            ));

            if since_snapshot >= self.batch_size {
                match writer.snapshot(&input, &fingerprint, store.log()) {
                    Ok(stats) => info!(
                        stage = name,
                        rows = stats.rows,
                        matched = stats.matched,
                        "Batch snapshot saved"
                    ),
                    Err(e) => warn!(stage = name, error = %e, "Batch snapshot failed; continuing"),
                }
                since_snapshot = 0;
            }

            self.pacer.pause().await;
        }

        let stats = writer.snapshot(&input, &fingerprint, store.log())?;
        pb.finish_with_message(format!(
            "Done! {} processed, {} skipped",
            report.processed, report.skipped
        ));

        report.snapshots = writer.writes();
        report.external_calls = self.executor.calls();
        report.runtime_secs = start.elapsed().as_secs_f64();
        report.finalize();

        info!(
            stage = name,
            processed = report.processed,
            skipped = report.skipped,
            errored = report.errored,
            missing = report.missing,
            snapshots = report.snapshots,
            external_calls = report.external_calls,
            output_rows = stats.rows,
            output = %self.paths.output.display(),
            "Stage complete"
        );
        Ok(report)
    }
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb
}
