use tracefan_core::config::TracefanConfig;
use tracefan_core::diagnostics::TracingSink;
use tracefan_core::orchestrator::Orchestrator;
use tracefan_core::scheduler::CancellationToken;

use anyhow::Context;
use clap::Parser;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Trace every input of a categorized corpus under a binary-instrumentation engine.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Corpus root containing one directory per category.
    #[clap(short, long)]
    input: Option<PathBuf>,
    /// Where validated traces are promoted.
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Number of concurrent tracing jobs (default: logical cores).
    #[clap(short, long)]
    jobs: Option<usize>,
    /// Seed for the job shuffle.
    #[clap(long)]
    seed: Option<u64>,
    /// Per-job wall-clock timeout in milliseconds.
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Keep raw traces instead of compressing them.
    #[clap(long)]
    no_package: bool,
    /// Move engine logs to <output>/logs.
    #[clap(long)]
    promote_logs: bool,
    #[clap(long, default_value = "tracing.log")]
    log_file: PathBuf,
    /// Target command; `@@` is replaced by the input path.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    target: Vec<String>,
}

fn init_logging(log_file: &Path) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {log_file:?}"))?;
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .init();
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<TracefanConfig> {
    match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            TracefanConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("tracefan.toml");
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                TracefanConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file specified and 'tracefan.toml' not found, using built-in defaults");
                Ok(TracefanConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut TracefanConfig, cli: Cli) {
    if let Some(input) = cli.input {
        config.run.input_dir = Some(input);
    }
    if let Some(output) = cli.output {
        config.run.output_dir = Some(output);
    }
    if let Some(jobs) = cli.jobs {
        config.run.parallelism = Some(jobs);
    }
    if let Some(seed) = cli.seed {
        config.run.seed = Some(seed);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.engine.timeout_ms = timeout_ms;
    }
    if cli.no_package {
        config.run.package = false;
    }
    if cli.promote_logs {
        config.run.promote_logs = true;
    }
    if !cli.target.is_empty() {
        config.target.command = cli.target;
    }
    if config.engine.command.is_empty() || config.engine.tool.is_none() {
        if let Some(pin_root) = std::env::var_os("PIN_ROOT") {
            let engine = std::mem::take(&mut config.engine);
            config.engine = engine.with_pin_root(PathBuf::from(pin_root).as_path());
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(&cli.log_file)?;

    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, cli);
    // Always record the shuffle seed so a run can be replayed.
    let seed = *config.run.seed.get_or_insert_with(rand::random);
    tracing::debug!("Effective configuration: {config:#?}");

    let orchestrator = Orchestrator::from_config(&config)?;
    info!(
        "Tracing with {} workers, shuffle seed {seed}",
        orchestrator.parallelism()
    );
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let sink = TracingSink::new();

    match orchestrator.trace_all(&mut rng, &CancellationToken::new(), &sink) {
        Ok(summary) => {
            info!(
                "Traced {}/{} inputs ({} invalid, {} timed out, {} process errors)",
                summary.statistics.valid,
                summary.statistics.processed,
                summary.statistics.invalid_total(),
                summary.statistics.timed_out,
                summary.statistics.process_errors
            );
            Ok(())
        }
        Err(e) => {
            error!("Tracing run aborted: {e}");
            std::process::exit(1);
        }
    }
}
