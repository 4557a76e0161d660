//! deepresearch - multi-agent research pipeline
//!
//! A CLI that researches a question with a local Ollama model and a
//! SearxNG instance and writes a cited report.
//!
//! Exit codes:
//!   0 - Report complete
//!   1 - Runtime error (invalid query, config, planning failure, etc.)
//!   3 - Report inconclusive (no evidence could be grounded)

use anyhow::{Context, Result};
use deepresearch::cli::{Args, OutputFormat};
use deepresearch::config::{Config, ReportConfig, CONFIG_FILE_NAME};
use deepresearch::models::Report;
use deepresearch::report::{generate_json_report, generate_markdown_report};
use deepresearch::ResearchCoordinator;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const EXIT_INCONCLUSIVE: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("deepresearch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_research(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Research failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .deepresearch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the model, search endpoint and research limits.");
    Ok(())
}

/// Initialize logging based on verbosity settings. Logs go to stderr so a
/// report written to stdout stays clean.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one research query end to end. Returns the exit code.
async fn run_research(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let query = match args.query.clone() {
        Some(query) => query,
        None => prompt_for_query()?,
    };

    let coordinator = ResearchCoordinator::from_config(&config)?;

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with the evidence gathered so far");
            cancel.cancel();
        }
    });

    if !args.quiet {
        eprintln!("🔎 Researching: {}", query.trim());
        eprintln!("   Model: {} via {}", config.model.name, config.model.ollama_url);
        eprintln!("   Search: {}", config.search.searx_url);
        eprintln!(
            "   Up to {} sub-question(s), {} iteration(s)\n",
            config.research.max_sub_questions, config.research.max_iterations
        );
    }

    let spinner = progress_spinner(args.quiet);
    let result = coordinator.research(&query).await;
    spinner.finish_and_clear();

    let report = result?;
    let output = render(&report, args.format, &config.report)?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !args.quiet {
                eprintln!("📝 Report saved to: {}", path.display());
            }
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(output.as_bytes())
                .context("Failed to write report to stdout")?;
            stdout.flush()?;
        }
    }

    if !args.quiet {
        print_summary(&report);
    }

    if report.is_inconclusive() {
        return Ok(EXIT_INCONCLUSIVE);
    }
    Ok(0)
}

/// Ask for the query on stdin when none was given on the command line.
fn prompt_for_query() -> Result<String> {
    eprintln!("Welcome to deepresearch! What would you like to research?");
    eprint!("> ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read query from stdin")?;

    Ok(line.trim().to_string())
}

fn progress_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Researching...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn render(report: &Report, format: OutputFormat, options: &ReportConfig) -> Result<String> {
    match format {
        OutputFormat::Json => generate_json_report(report),
        OutputFormat::Markdown => Ok(generate_markdown_report(report, options)),
    }
}

fn print_summary(report: &Report) {
    let metadata = &report.metadata;

    eprintln!("\n📊 Research Summary:");
    eprintln!("   Status: {}", report.status);
    eprintln!(
        "   Sub-questions: {} ({} failed) over {} iteration(s)",
        metadata.sub_questions_total, metadata.sub_questions_failed, metadata.iterations
    );
    eprintln!(
        "   Findings: {} in {} claim(s), {} conflicting",
        metadata.findings, metadata.clusters, metadata.conflicts
    );
    eprintln!("   Sources cited: {}", report.sources.len());
    eprintln!("   Duration: {:.1}s", metadata.duration_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
