//! siftline CLI - run the lead pipeline stage by stage or end to end.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use siftline::client::HealthStatus;
use siftline::pipeline::{CleanReport, RunSummary};
use siftline::{Config, LLMClient, Pipeline, StageOptions, StageReport};
use std::path::{Path, PathBuf};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "siftline")]
#[command(version)]
#[command(about = "Checkpointed pipeline turning harvested posts into enriched, scored leads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "siftline.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize and dedup harvested posts
    Capture {
        /// Process at most this many new records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Clean post text, drop job offers and duplicates
    Clean,

    /// Enrich posts with company information and theme
    Enrich {
        /// Process at most this many new records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Score enriched posts as leads
    Score {
        /// Process at most this many new records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Export scored leads as a JSON array
    Export,

    /// Run capture, clean, enrich, score and export in sequence
    RunAll {
        /// Per-stage cap on new records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Validate configuration and check the model endpoint
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

fn print_example_config() {
    let example = r#"# siftline configuration file

# Relative paths below are resolved against this directory
data_dir = "data"

[llm]
name = "ollama"
base_url = "http://localhost:11434/v1"
model = "mistral"
# api_key = "${OPENROUTER_API_KEY}"
# api_key_env = "OPENROUTER_API_KEY"
temperature = 0.0
max_tokens = 1024

[search]
base_url = "https://html.duckduckgo.com/html/"
user_agent = "Mozilla/5.0"
max_results = 3

[pacing]
min_secs = 1.5
max_secs = 3.0
between_calls_secs = 0.0

[engine]
batch_size = 50
call_timeout_secs = 60

[capture]
input = "harvest.jsonl"
output = "captured.jsonl"
log = "log_01.jsonl"
marker = "log_01.txt"
pacing = { min_secs = 0.0, max_secs = 0.0 }

[clean]
input = "captured.jsonl"
output = "cleaned.jsonl"

[enrich]
input = "cleaned.jsonl"
output = "enriched.jsonl"
log = "log_03.jsonl"
marker = "log_03.txt"

[score]
input = "enriched.jsonl"
output = "scored.jsonl"
log = "log_04.jsonl"
marker = "log_04.txt"
profile = "a company operating autonomous underwater vehicles for marine surveys"
search_terms = "offshore marine survey"

[export]
input = "scored.jsonl"
output = "scored_clean.json"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn options(limit: Option<usize>) -> StageOptions {
    StageOptions {
        limit,
        show_progress: true,
    }
}

fn print_stage(report: &StageReport) {
    println!("\n=== Stage '{}' Complete ===", report.stage);
    println!("Records:     {}", report.total_records);
    println!("Skipped:     {}", report.skipped);
    println!("Processed:   {}", report.processed);
    println!("Errored:     {}", report.errored);
    println!("Missing:     {}", report.missing);
    println!("Calls:       {}", report.external_calls);
    println!("Snapshots:   {}", report.snapshots);
    println!("Throughput:  {:.0}/hr", report.throughput_per_hour);
    println!("Runtime:     {:.1}s", report.runtime_secs);
}

fn print_clean(report: &CleanReport) {
    println!("\n=== Clean Complete ===");
    println!("Input rows:  {}", report.input_rows);
    println!("Job posts:   {}", report.job_posts_dropped);
    println!("Duplicates:  {}", report.duplicates_dropped);
    println!("Output rows: {}", report.output_rows);
}

fn print_summary(summary: &RunSummary) {
    print_stage(&summary.capture);
    print_clean(&summary.clean);
    print_stage(&summary.enrich);
    print_stage(&summary.score);
    println!("\nExported:    {} leads", summary.exported);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            let client = LLMClient::from_config(&config, None)
                .context("Failed to create model client")?;

            info!("Configuration is valid");
            info!("  Model: {} via {} ({})", client.model(), config.llm.name, config.llm.base_url);
            info!("  Batch size: {}", config.engine.batch_size);
            info!(
                "  Pacing: {:.1}-{:.1}s",
                config.pacing.min_secs, config.pacing.max_secs
            );

            let health = client.health_check().await;
            match health.status {
                HealthStatus::Healthy => info!(
                    endpoint = %health.endpoint,
                    latency_ms = health.latency_ms.unwrap_or_default(),
                    "Model endpoint is healthy"
                ),
                status => warn!(
                    endpoint = %health.endpoint,
                    %status,
                    error = health.error.as_deref().unwrap_or_default(),
                    "Model endpoint check failed"
                ),
            }
            return Ok(());
        }

        Commands::Clean => {
            let config = load_config(&cli.config)?;
            let pipeline = Pipeline::from_config(config)?;
            let report = pipeline.clean().context("Clean stage failed")?;
            print_clean(&report);
        }

        Commands::Export => {
            let config = load_config(&cli.config)?;
            let pipeline = Pipeline::from_config(config)?;
            let rows = pipeline.export().context("Export stage failed")?;
            println!("Exported {rows} leads to {:?}", pipeline.config().export.output);
        }

        Commands::Capture { limit } => {
            let pipeline = Pipeline::from_config(load_config(&cli.config)?)?;
            let report = pipeline
                .capture(&options(limit))
                .await
                .context("Capture stage failed")?;
            print_stage(&report);
        }

        Commands::Enrich { limit } => {
            let pipeline = Pipeline::from_config(load_config(&cli.config)?)?;
            let report = pipeline
                .enrich(&options(limit))
                .await
                .context("Enrich stage failed")?;
            print_stage(&report);
        }

        Commands::Score { limit } => {
            let pipeline = Pipeline::from_config(load_config(&cli.config)?)?;
            let report = pipeline
                .score(&options(limit))
                .await
                .context("Score stage failed")?;
            print_stage(&report);
        }

        Commands::RunAll { limit } => {
            let pipeline = Pipeline::from_config(load_config(&cli.config)?)?;
            let summary = pipeline
                .run_all(&options(limit))
                .await
                .context("Pipeline run failed")?;
            print_summary(&summary);
        }
    }

    Ok(())
}
