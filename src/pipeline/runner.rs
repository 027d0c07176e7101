//! Stage wiring: config plus collaborators → runnable stages.
//!
//! Pipeline flow:
//! harvest → capture → clean → enrich → score → export

use crate::client::{DuckDuckGoSearch, LLMClient, LanguageModel, RateLimiter, WebSearch};
use crate::models::{Config, Result, StageReport};
use crate::pipeline::{
    CapturePlugin, CleanReport, EnrichPlugin, ScorePlugin, StageDriver, StageOptions, run_clean,
    run_export,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Reports of a full pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub capture: StageReport,
    pub clean: CleanReport,
    pub enrich: StageReport,
    pub score: StageReport,
    pub exported: usize,
}

/// The configured pipeline and its external collaborators.
pub struct Pipeline {
    config: Config,
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn WebSearch>,
}

impl Pipeline {
    pub fn new(config: Config, llm: Arc<dyn LanguageModel>, search: Arc<dyn WebSearch>) -> Self {
        Self {
            config,
            llm,
            search,
        }
    }

    /// Build the HTTP collaborators described by `config`. They share one backoff table.
    pub fn from_config(config: Config) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new());
        let llm = LLMClient::from_config(&config, Some(Arc::clone(&limiter)))?;
        let search = DuckDuckGoSearch::new(
            &config.search,
            Duration::from_secs(config.engine.call_timeout_secs),
            Some(limiter),
        )?;
        Ok(Self::new(config, Arc::new(llm), Arc::new(search)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn capture(&self, options: &StageOptions) -> Result<StageReport> {
        StageDriver::from_config(CapturePlugin::new(), &self.config, &self.config.capture)
            .run(options)
            .await
    }

    pub fn clean(&self) -> Result<CleanReport> {
        let stage = &self.config.clean;
        run_clean(
            &self.config.resolve(&stage.input),
            &self.config.resolve(&stage.output),
        )
    }

    pub async fn enrich(&self, options: &StageOptions) -> Result<StageReport> {
        let plugin = EnrichPlugin::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.search),
            self.config.search.max_results,
        );
        StageDriver::from_config(plugin, &self.config, &self.config.enrich)
            .run(options)
            .await
    }

    pub async fn score(&self, options: &StageOptions) -> Result<StageReport> {
        let plugin = ScorePlugin::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.search),
            &self.config.score,
        );
        StageDriver::from_config(plugin, &self.config, &self.config.score.stage)
            .run(options)
            .await
    }

    pub fn export(&self) -> Result<usize> {
        let stage = &self.config.export;
        run_export(
            &self.config.resolve(&stage.input),
            &self.config.resolve(&stage.output),
        )
    }

    /// Run every stage in order; the first failure stops the sequence.
    pub async fn run_all(&self, options: &StageOptions) -> Result<RunSummary> {
        info!("Running capture → clean → enrich → score → export");
        let capture = self.capture(options).await?;
        let clean = self.clean()?;
        let enrich = self.enrich(options).await?;
        let score = self.score(options).await?;
        let exported = self.export()?;
        Ok(RunSummary {
            capture,
            clean,
            enrich,
            score,
            exported,
        })
    }
}
