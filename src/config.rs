use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_source_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl SourceConfig {
    /// The retry policy shared by every upstream call (content source and embeddings).
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_base_url() -> String {
    "https://www.ecfr.gov".to_string()
}
fn default_source_timeout() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    8
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_epoch")]
    pub epoch: String,
    #[serde(default)]
    pub run_until: Option<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
            run_until: None,
            max_concurrency: default_max_concurrency(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl IngestConfig {
    pub fn epoch_date(&self) -> Result<NaiveDate> {
        parse_date(&self.epoch).context("ingest.epoch")
    }

    pub fn run_until_date(&self) -> Result<Option<NaiveDate>> {
        self.run_until
            .as_deref()
            .map(|s| parse_date(s).context("ingest.run_until"))
            .transpose()
    }
}

fn default_epoch() -> String {
    "2017-01-01".to_string()
}
fn default_max_concurrency() -> usize {
    10
}
fn default_failure_threshold() -> f64 {
    0.10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
        }
    }
}

fn default_cron() -> String {
    // 7 PM, Monday through Friday
    "0 0 19 * * Mon-Fri".to_string()
}
fn default_timezone() -> String {
    "America/New_York".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", value))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    config.ingest.epoch_date()?;
    config.ingest.run_until_date()?;

    if config.ingest.max_concurrency == 0 {
        anyhow::bail!("ingest.max_concurrency must be >= 1");
    }

    let threshold = config.ingest.failure_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        anyhow::bail!("ingest.failure_threshold must be in (0.0, 1.0]");
    }

    if config.source.max_attempts == 0 {
        anyhow::bail!("source.max_attempts must be >= 1");
    }

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.schedule.timezone.parse::<chrono_tz::Tz>().is_err() {
        anyhow::bail!("schedule.timezone '{}' is not a known IANA zone", config.schedule.timezone);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let text = format!("[db]\npath = \"/tmp/regobs.sqlite\"\n{}", extra);
        let config: Config = toml::from_str(&text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.ingest.epoch, "2017-01-01");
        assert_eq!(config.ingest.max_concurrency, 10);
        assert!((config.ingest.failure_threshold - 0.10).abs() < f64::EPSILON);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.source.base_url, "https://www.ecfr.gov");
        assert_eq!(config.schedule.timezone, "America/New_York");
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/regobs.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.ingest.run_until_date().unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(parse("[ingest]\nfailure_threshold = 0.0\n").is_err());
        assert!(parse("[ingest]\nfailure_threshold = 1.5\n").is_err());
    }

    #[test]
    fn test_rejects_bad_epoch() {
        assert!(parse("[ingest]\nepoch = \"01/01/2017\"\n").is_err());
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        let ok = parse(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        )
        .unwrap();
        assert!(ok.embedding.is_enabled());
    }

    #[test]
    fn test_unknown_provider() {
        assert!(parse("[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 4\n").is_err());
    }

    #[test]
    fn test_run_until_parsed() {
        let config = parse("[ingest]\nrun_until = \"2017-03-01\"\n").unwrap();
        assert_eq!(
            config.ingest.run_until_date().unwrap(),
            NaiveDate::from_ymd_opt(2017, 3, 1)
        );
    }
}
