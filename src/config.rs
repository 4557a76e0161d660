//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.deepresearch.toml` files. Every tunable has a documented default so a
//! missing file or a partial table is always valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".deepresearch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Language model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Search backend settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Pipeline tunables.
    #[serde(default)]
    pub research: ResearchConfig,

    /// Report output settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,

    /// Retries for rate-limited calls.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Initial backoff between rate-limited retries, doubled on each attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_model_timeout(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_model_timeout() -> u64 {
    120
}

fn default_retries() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

/// Search backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// SearxNG instance URL.
    #[serde(default = "default_searx_url")]
    pub searx_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u64,

    /// Optional engines restriction passed through to SearxNG.
    #[serde(default)]
    pub engines: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            searx_url: default_searx_url(),
            timeout_seconds: default_search_timeout(),
            engines: None,
        }
    }
}

fn default_searx_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_search_timeout() -> u64 {
    20
}

/// Tunables of the research pipeline itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Upper bound on sub-questions per plan.
    #[serde(default = "default_max_sub_questions")]
    pub max_sub_questions: usize,

    /// Maximum gather/evaluate iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Timeout for one sub-question's search + extraction, in seconds.
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,

    /// Sub-question pipelines running at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// External calls (search + agent) in flight at the same time.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_calls: usize,

    /// Token similarity above which two claims are duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Token similarity above which opposite claims count as conflicting.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: f64,

    /// Sources requested per search.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Overall wall-clock limit for a run, in seconds. `None` disables it.
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sub_questions: default_max_sub_questions(),
            max_iterations: default_max_iterations(),
            worker_timeout_seconds: default_worker_timeout(),
            concurrency: default_concurrency(),
            max_in_flight_calls: default_max_in_flight(),
            similarity_threshold: default_similarity_threshold(),
            conflict_threshold: default_conflict_threshold(),
            top_k: default_top_k(),
            run_timeout_seconds: None,
        }
    }
}

fn default_max_sub_questions() -> usize {
    5
}

fn default_max_iterations() -> usize {
    3
}

fn default_worker_timeout() -> u64 {
    180
}

fn default_concurrency() -> usize {
    4
}

fn default_max_in_flight() -> usize {
    8
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_conflict_threshold() -> f64 {
    0.5
}

fn default_top_k() -> usize {
    5
}

impl ResearchConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_seconds)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_seconds.map(Duration::from_secs)
    }

    /// Check the ranges the pipeline relies on.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_sub_questions == 0 {
            return Err("max_sub_questions must be at least 1".to_string());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        if self.concurrency == 0 || self.max_in_flight_calls == 0 {
            return Err("concurrency limits must be at least 1".to_string());
        }
        if self.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        if self.worker_timeout_seconds == 0 {
            return Err("worker_timeout_seconds must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold)
            || !(0.0..=1.0).contains(&self.conflict_threshold)
        {
            return Err("similarity thresholds must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include the bibliography section.
    #[serde(default = "default_true")]
    pub include_sources: bool,

    /// Include finding ids next to numbered citations.
    #[serde(default)]
    pub show_finding_ids: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_sources: true,
            show_finding_ids: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.deepresearch.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(ref url) = args.searx_url {
            self.search.searx_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }

        if let Some(n) = args.max_sub_questions {
            self.research.max_sub_questions = n;
        }
        if let Some(n) = args.max_iterations {
            self.research.max_iterations = n;
        }
        if let Some(n) = args.concurrency {
            self.research.concurrency = n;
        }
        if let Some(n) = args.top_k {
            self.research.top_k = n;
        }
        if let Some(secs) = args.worker_timeout {
            self.research.worker_timeout_seconds = secs;
        }
        if let Some(secs) = args.timeout {
            self.research.run_timeout_seconds = Some(secs);
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.research.max_iterations, 3);
        assert_eq!(config.research.top_k, 5);
        assert!(config.research.run_timeout_seconds.is_none());
        assert!(config.research.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
[model]
name = "qwen2.5:14b"
temperature = 0.4

[research]
max_sub_questions = 8
similarity_threshold = 0.75
run_timeout_seconds = 600
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert_eq!(config.model.temperature, 0.4);
        assert_eq!(config.model.ollama_url, "http://localhost:11434");
        assert_eq!(config.research.max_sub_questions, 8);
        assert_eq!(config.research.similarity_threshold, 0.75);
        assert_eq!(config.research.run_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.research.max_iterations, 3);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut research = ResearchConfig::default();
        research.max_iterations = 0;
        assert!(research.validate().is_err());

        let mut research = ResearchConfig::default();
        research.similarity_threshold = 1.5;
        assert!(research.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[search]"));
        assert!(toml_str.contains("[research]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.research, ResearchConfig::default());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[research]\nmax_iterations = 2\n",
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.research.max_iterations, 2);
    }

    #[test]
    fn test_cli_overrides_only_explicit_values() {
        use clap::Parser;

        let args = crate::cli::Args::try_parse_from([
            "deepresearch",
            "--max-iterations",
            "5",
            "--timeout",
            "120",
        ])
        .unwrap();

        let mut config = Config::default();
        config.research.top_k = 9;
        config.merge_with_args(&args);

        assert_eq!(config.research.max_iterations, 5);
        assert_eq!(config.research.run_timeout_seconds, Some(120));
        assert_eq!(config.research.top_k, 9);
    }
}
