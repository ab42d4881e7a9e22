//! `mend` binary: one-shot and looping entry points around the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notify::Notifier;
use scm::GithubClient;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mend::automerge::MergeGate;
use mend::config::Config;
use mend::dispatch::Dispatcher;
use mend::health::HealthMonitor;
use mend::orchestrator::Orchestrator;
use mend::ratelimit::RateLimitGovernor;
use mend::tiers::{HttpRepairBackend, HttpReviewBackend};

#[derive(Parser)]
#[command(
    name = "mend",
    about = "Self-healing change-request remediation orchestrator",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single remediation sweep and exit
    Run {
        /// Path to the configuration file
        #[arg(long, default_value = "mend.json")]
        config: PathBuf,
    },
    /// Run sweeps on a fixed interval until interrupted
    Loop {
        /// Path to the configuration file
        #[arg(long, default_value = "mend.json")]
        config: PathBuf,

        /// Seconds between sweeps
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("mend={default_level},scm={default_level},notify={default_level}"))),
        )
        .init();

    match cli.command {
        Commands::Run { config } => {
            let mut orchestrator = build(&config, None)?.0;
            let report = orchestrator.run().await?;
            info!(
                processed = report.tally.processed,
                merged = report.tally.merged,
                escalations = report.escalations.len(),
                "Sweep finished"
            );
        }
        Commands::Loop { config, interval } => {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            info!(interval_secs = interval, "Entering remediation loop");
            // Rate-limit windows outlive individual sweeps
            let mut governor = None;
            loop {
                ticker.tick().await;
                // Config is re-read for every sweep; a failed sweep is
                // logged and the loop keeps its cadence
                match build(&config, governor.take()) {
                    Ok((mut orchestrator, gov)) => {
                        governor = Some(gov);
                        if let Err(e) = orchestrator.run().await {
                            error!(error = %e, "Sweep failed");
                        }
                    }
                    Err(e) => error!(error = %e, "Sweep setup failed"),
                }
            }
        }
    }

    Ok(())
}

fn build(
    config_path: &Path,
    existing_governor: Option<Arc<RateLimitGovernor>>,
) -> anyhow::Result<(Orchestrator, Arc<RateLimitGovernor>)> {
    let config = Arc::new(
        Config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?,
    );

    let (owner, repo) = config
        .split_repository()
        .context("invalid repository in config")?;
    let scm: Arc<dyn scm::ScmClient> = Arc::new(
        GithubClient::from_env(owner.to_string(), repo.to_string())
            .context("constructing platform client")?,
    );

    let call_timeout = Duration::from_secs(config.call_timeout_secs);
    let review = Arc::new(
        HttpReviewBackend::new(config.review_url.clone(), config.repository.clone(), call_timeout)
            .context("constructing review backend")?,
    );
    let repair = Arc::new(
        HttpRepairBackend::new(config.repair_url.clone(), config.repository.clone(), call_timeout)
            .context("constructing repair backend")?,
    );

    // Reuse the governor across sweeps so the hourly windows keep their
    // consumption; only the configured capacities and bands are refreshed
    let governor = match existing_governor {
        Some(governor) => {
            governor.reconfigure(&config.tiers, config.time_bands.clone());
            governor
        }
        None => Arc::new(RateLimitGovernor::new(
            &config.tiers,
            config.time_bands.clone(),
            chrono::Utc::now(),
        )),
    };
    let gate = MergeGate::new(
        Arc::clone(&scm),
        config.target_branch.clone(),
        config.merge_method,
        config.required_checks.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&scm),
        Arc::clone(&governor),
        review,
        repair,
        gate,
        Arc::clone(&config),
    ));

    let monitor = HealthMonitor::load(&config.history_path, config.history_limit)
        .context("loading run history")?;
    let notifier = Notifier::from_env();

    let orchestrator = Orchestrator::new(scm, dispatcher, monitor, notifier, config);
    Ok((orchestrator, governor))
}
