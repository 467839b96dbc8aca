use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use feedskim::config::{Config, Settings};
use feedskim::pipeline::{run_concurrent, run_sequential, FailurePolicy};
use feedskim::profile::run_profile;

/// Get the default config file path (~/.config/feedskim/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("feedskim")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedskim",
    about = "Stream a product XML feed and report the title of every linked page"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ~/.config/feedskim/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Feed URL, overrides the config file
    #[arg(long, value_name = "URL", global = true)]
    feed_url: Option<String>,

    /// Maximum size of a downloaded chunk in bytes
    #[arg(long, value_name = "BYTES", global = true)]
    chunk_size: Option<usize>,

    /// Number of workers, also the queue capacity
    #[arg(long, value_name = "N", global = true)]
    workers: Option<usize>,

    /// What a failed page does to the run
    #[arg(long, value_enum, global = true)]
    policy: Option<FailurePolicy>,

    /// Enable debug logging for feedskim
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Process items one at a time while the feed downloads
    Sequential,
    /// Process items with a bounded worker pool
    Concurrent,
    /// Stream the gzip profiling dataset and log parser memory use
    Profile,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.feed_url {
            config.feed_url = url.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(policy) = self.policy {
            config.failure_policy = policy;
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info,feedskim=debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare(config: &Config) -> Result<(reqwest::Client, Settings)> {
    let settings = config.resolve().context("Invalid configuration")?;
    let client = settings
        .http_client()
        .context("Failed to build HTTP client")?;
    Ok((client, settings))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    args.apply_overrides(&mut config);

    let started = Instant::now();

    let summary = match args.command {
        Command::Profile => {
            let settings = config
                .resolve_profile()
                .context("Invalid profile configuration")?;
            let client = settings
                .http_client()
                .context("Failed to build HTTP client")?;
            let report = run_profile(client, &settings)
                .await
                .context("Profiling run failed")?;
            tracing::info!(
                entries = report.entries,
                elapsed_secs = %format!("{:.2}", started.elapsed().as_secs_f64()),
                "Done"
            );
            return Ok(());
        }
        Command::Sequential => {
            let (client, settings) = prepare(&config)?;
            run_sequential(client, &settings).await
        }
        Command::Concurrent => {
            let (client, settings) = prepare(&config)?;
            run_concurrent(client, &settings).await
        }
    }
    .with_context(|| format!("Scraping {} failed", config.feed_url))?;

    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        extracted = summary.extracted,
        elapsed_secs = %format!("{:.2}", started.elapsed().as_secs_f64()),
        "Done"
    );
    Ok(())
}
