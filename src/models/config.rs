//! Configuration models for siftline.
//!
//! Every tunable of the pipeline lives here and is loaded from a TOML file.
//! Missing sections fall back to built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration for siftline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that relative stage paths are resolved against
    pub data_dir: Option<PathBuf>,

    /// Language model endpoint
    pub llm: LlmConfig,

    /// Web search and page fetching
    pub search: SearchConfig,

    /// Default pacing window between records
    pub pacing: PacingConfig,

    /// Engine settings shared by all checkpointed stages
    pub engine: EngineConfig,

    /// Capture stage (browser harvest → captured dataset)
    pub capture: StageConfig,

    /// Cleaning stage (captured → cleaned)
    pub clean: TransformConfig,

    /// Enrichment stage (cleaned → enriched)
    pub enrich: StageConfig,

    /// Scoring stage (enriched → scored)
    pub score: ScoreConfig,

    /// Export stage (scored → JSON array)
    pub export: TransformConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            pacing: PacingConfig::default(),
            engine: EngineConfig::default(),
            capture: StageConfig::named("harvest.jsonl", "captured.jsonl", "log_01"),
            clean: TransformConfig {
                input: PathBuf::from("captured.jsonl"),
                output: PathBuf::from("cleaned.jsonl"),
            },
            enrich: StageConfig::named("cleaned.jsonl", "enriched.jsonl", "log_03"),
            score: ScoreConfig::default(),
            export: TransformConfig {
                input: PathBuf::from("scored.jsonl"),
                output: PathBuf::from("scored_clean.json"),
            },
        }
    }
}

/// OpenAI-compatible chat completion endpoint (Ollama, vLLM, OpenRouter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Endpoint name used in logs
    pub name: String,

    /// Base URL of the API (without `/chat/completions`)
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// API key; may contain ${ENV_VAR} placeholders
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Extra headers; values may contain ${ENV_VAR} placeholders
    pub headers: HashMap<String, String>,

    /// Sampling temperature
    pub temperature: f64,

    /// Maximum tokens per completion
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            name: "ollama".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            model: "mistral".to_string(),
            api_key: None,
            api_key_env: None,
            headers: HashMap::new(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Web search collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// HTML search endpoint, queried with `?q=`
    pub base_url: String,

    /// User agent sent with searches and page fetches
    pub user_agent: String,

    /// Number of result pages fetched per enrichment search
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://html.duckduckgo.com/html/".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            max_results: 3,
        }
    }
}

/// Uniform random delay window applied after every processed record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Lower bound of the delay, in seconds
    pub min_secs: f64,

    /// Upper bound of the delay, in seconds
    pub max_secs: f64,

    /// Fixed delay between dependent calls of one record, in seconds
    pub between_calls_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_secs: 1.5,
            max_secs: 3.0,
            between_calls_secs: 0.0,
        }
    }
}

impl PacingConfig {
    /// A window that never sleeps.
    pub fn none() -> Self {
        Self {
            min_secs: 0.0,
            max_secs: 0.0,
            between_calls_secs: 0.0,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot every N processed records
    pub batch_size: usize,

    /// Upper bound for any single external call, in seconds
    pub call_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            call_timeout_secs: 60,
        }
    }
}

/// Paths and pacing of one checkpointed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Input dataset (JSONL)
    pub input: PathBuf,

    /// Output snapshot (JSONL)
    pub output: PathBuf,

    /// Durable log (JSONL)
    pub log: PathBuf,

    /// Marker file (one key per line)
    pub marker: PathBuf,

    /// Overrides `[pacing]` for this stage
    #[serde(default)]
    pub pacing: Option<PacingConfig>,
}

impl StageConfig {
    fn named(input: &str, output: &str, log_stem: &str) -> Self {
        Self {
            input: PathBuf::from(input),
            output: PathBuf::from(output),
            log: PathBuf::from(format!("{log_stem}.jsonl")),
            marker: PathBuf::from(format!("{log_stem}.txt")),
            pacing: None,
        }
    }
}

/// Scoring stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    #[serde(flatten)]
    pub stage: StageConfig,

    /// Who the leads are scored for; injected into every scoring prompt
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Appended to the company website in the context search
    #[serde(default = "default_search_terms")]
    pub search_terms: String,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            stage: StageConfig::named("enriched.jsonl", "scored.jsonl", "log_04"),
            profile: default_profile(),
            search_terms: default_search_terms(),
        }
    }
}

fn default_profile() -> String {
    "a company operating autonomous underwater vehicles for marine surveys \
     (offshore wind farms, submarine cables, pipelines, marine infrastructure)"
        .to_string()
}

fn default_search_terms() -> String {
    "offshore marine survey".to_string()
}

/// Input/output pair of a deterministic stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "engine.batch_size must be at least 1".to_string(),
            ));
        }
        if self.engine.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.call_timeout_secs must be at least 1".to_string(),
            ));
        }
        let windows = [
            ("pacing", Some(self.pacing)),
            ("capture.pacing", self.capture.pacing),
            ("enrich.pacing", self.enrich.pacing),
            ("score.pacing", self.score.stage.pacing),
        ];
        for (name, window) in windows {
            if let Some(w) = window {
                if w.min_secs < 0.0 || w.between_calls_secs < 0.0 || w.min_secs > w.max_secs {
                    return Err(ConfigError::Invalid(format!(
                        "{name}: expected 0 <= min_secs <= max_secs and between_calls_secs >= 0"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve a configured path against `data_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.data_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Effective pacing window of a stage.
    pub fn pacing_for(&self, stage: &StageConfig) -> PacingConfig {
        stage.pacing.unwrap_or(self.pacing)
    }

    /// Resolve the model API key from config or environment.
    ///
    /// `Ok(None)` is valid for local endpoints that need no auth.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.llm.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        match &self.llm.api_key_env {
            Some(env_var) => std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    endpoint: self.llm.name.clone(),
                    env_var: env_var.clone(),
                }),
            None => Ok(None),
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for endpoint '{endpoint}': set {env_var} env var or api_key in config")]
    MissingApiKey { endpoint: String, env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.batch_size, 50);
        assert_eq!(config.pacing.min_secs, 1.5);
        assert_eq!(config.pacing.max_secs, 3.0);
        assert_eq!(config.enrich.log, PathBuf::from("log_03.jsonl"));
        assert_eq!(config.score.stage.marker, PathBuf::from("log_04.txt"));
        assert_eq!(config.llm.model, "mistral");
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
data_dir = "/srv/leads"

[engine]
batch_size = 10

[score]
input = "in.jsonl"
output = "out.jsonl"
log = "score.jsonl"
marker = "score.txt"
pacing = { min_secs = 0.0, max_secs = 0.5 }
"#,
        )
        .unwrap();

        assert_eq!(config.engine.batch_size, 10);
        assert_eq!(config.engine.call_timeout_secs, 60);
        assert!(config.score.profile.contains("underwater"));
        assert_eq!(config.pacing_for(&config.score.stage).max_secs, 0.5);
        assert_eq!(config.pacing_for(&config.enrich).max_secs, 3.0);
        assert_eq!(
            config.resolve(&config.score.stage.input),
            PathBuf::from("/srv/leads/in.jsonl")
        );
        assert_eq!(
            config.resolve(Path::new("/abs/x.jsonl")),
            PathBuf::from("/abs/x.jsonl")
        );
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = Config::default();
        config.pacing.min_secs = 4.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.engine.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\nbatch_size = 1").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_api_key_optional_for_local_endpoints() {
        let config = Config::default();
        assert_eq!(config.resolve_api_key().unwrap(), None);

        let mut config = Config::default();
        config.llm.api_key = Some("sk-literal".to_string());
        assert_eq!(config.resolve_api_key().unwrap().as_deref(), Some("sk-literal"));

        let mut config = Config::default();
        config.llm.api_key_env = Some("SIFTLINE_TEST_UNSET_KEY_VAR".to_string());
        assert!(matches!(
            config.resolve_api_key(),
            Err(ConfigError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown_placeholders() {
        assert_eq!(
            expand_env_vars("Bearer ${SIFTLINE_TEST_UNSET_VAR}"),
            "Bearer ${SIFTLINE_TEST_UNSET_VAR}"
        );
    }
}
