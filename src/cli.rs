//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Tunables are optional here so that unset flags
//! leave the configuration file values in place.

use clap::Parser;
use std::path::PathBuf;

/// deepresearch - multi-agent research from the command line
///
/// Decomposes a question into sub-questions, researches them in parallel
/// against a SearxNG instance with a local Ollama model and writes a
/// report in which every claim cites its sources.
///
/// Examples:
///   deepresearch --query "effects of remote work on urban housing"
///   deepresearch --query "..." --max-iterations 2 --output report.md
///   deepresearch --format json --timeout 600
///   deepresearch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// The research question
    ///
    /// Prompted for on standard input when omitted.
    #[arg(long, value_name = "TEXT")]
    pub query: Option<String>,

    /// Ollama model to use for every agent capability
    #[arg(short, long, env = "DEEPRESEARCH_MODEL")]
    pub model: Option<String>,

    /// Output file for the report (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// SearxNG endpoint URL
    #[arg(long, env = "SEARX_URL")]
    pub searx_url: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .deepresearch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only, no progress)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Maximum sub-questions per plan
    #[arg(long, value_name = "NUM")]
    pub max_sub_questions: Option<usize>,

    /// Maximum gather/evaluate iterations
    #[arg(long, value_name = "NUM")]
    pub max_iterations: Option<usize>,

    /// Number of sub-questions researched at the same time
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Sources retrieved per sub-question
    #[arg(long, value_name = "NUM")]
    pub top_k: Option<usize>,

    /// Timeout for a single sub-question, in seconds
    #[arg(long, value_name = "SECS")]
    pub worker_timeout: Option<u64>,

    /// Overall time limit for the run, in seconds
    ///
    /// When it expires, gathering stops and the report covers what was
    /// found so far.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Generate a default .deepresearch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        for (name, url) in [("Ollama", &self.ollama_url), ("SearxNG", &self.searx_url)] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("{} URL must start with 'http://' or 'https://'", name));
                }
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        let counts = [
            ("Max sub-questions", self.max_sub_questions),
            ("Max iterations", self.max_iterations),
            ("Concurrency", self.concurrency),
            ("Top-k", self.top_k),
        ];
        for (name, value) in counts {
            if value == Some(0) {
                return Err(format!("{} must be at least 1", name));
            }
        }

        if self.worker_timeout == Some(0) || self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
