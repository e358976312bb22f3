//! Shelfscan main entry point
//!
//! This is the command-line interface for running catalog crawl jobs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use shelfscan::config::{load_config_with_hash, Config};
use shelfscan::crawler::{clear_job, HttpFetcher, JobContext, Orchestrator};
use shelfscan::output::{print_checkpoint_status, print_summary, SqliteSink};
use shelfscan::storage::{CheckpointStore, FileCheckpointStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Shelfscan: a polite multi-site catalog crawler
///
/// Shelfscan walks product listings of the configured sites, adapts its pace
/// to how hard each site pushes back, and merges everything into one
/// deduplicated catalog. Interrupted jobs resume from their checkpoint.
#[derive(Parser, Debug)]
#[command(name = "shelfscan")]
#[command(version)]
#[command(about = "A polite multi-site catalog crawler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job, resuming from its checkpoint if one exists
    Run {
        /// Path to the TOML job file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Discard the checkpoint and start over
        #[arg(long, conflicts_with = "resume")]
        fresh: bool,

        /// Require an existing checkpoint
        #[arg(long, conflicts_with = "fresh")]
        resume: bool,
    },

    /// Delete the job's checkpoint
    Clear {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Show the progress stored in the job's checkpoint
    Status {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Validate the job file and list its targets without crawling
    Check {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            config,
            fresh,
            resume,
        } => handle_run(&config, fresh, resume).await,
        Command::Clear { config } => handle_clear(&config),
        Command::Status { config } => handle_status(&config),
        Command::Check { config } => handle_check(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelfscan=info,warn"),
            1 => EnvFilter::new("shelfscan=debug,info"),
            2 => EnvFilter::new("shelfscan=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn load(path: &Path) -> anyhow::Result<(Config, String)> {
    tracing::info!("Loading job file from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("invalid job file {}", path.display()))?;
    tracing::debug!("Job file hash: {}", hash);
    Ok((config, hash))
}

fn checkpoint_store(config: &Config) -> anyhow::Result<FileCheckpointStore> {
    FileCheckpointStore::new(&config.job.checkpoint_dir).with_context(|| {
        format!(
            "cannot use checkpoint directory {}",
            config.job.checkpoint_dir
        )
    })
}

async fn handle_run(path: &Path, fresh: bool, resume: bool) -> anyhow::Result<()> {
    let (config, hash) = load(path)?;
    let store = Arc::new(checkpoint_store(&config)?);

    if fresh && clear_job(store.as_ref(), &config.job.id)? {
        tracing::info!("Discarded previous checkpoint for {}", config.job.id);
    }

    let sink = SqliteSink::new(Path::new(&config.output.database_path))
        .with_context(|| format!("cannot open catalog {}", config.output.database_path))?;
    let fetcher = HttpFetcher::new().context("cannot build HTTP client")?;

    let ctx = JobContext::new(config, hash, Arc::new(fetcher), store, Box::new(sink));
    let orchestrator = if resume {
        Orchestrator::open_existing(ctx)?
    } else {
        Orchestrator::open(ctx)?
    };

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, saving checkpoint and stopping");
            cancel.cancel();
        }
    });

    let progress = orchestrator.progress();
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = progress.snapshot();
            tracing::info!(
                "Progress: {} new records, {} pages, {} blocked",
                snapshot.counters.scraped,
                snapshot.counters.pages,
                snapshot.counters.blocked
            );
        }
    });

    let result = orchestrator.run().await;
    reporter.abort();

    let result = result.context("job stopped")?;
    print_summary(&result);
    Ok(())
}

fn handle_clear(path: &Path) -> anyhow::Result<()> {
    let (config, _) = load(path)?;
    let store = checkpoint_store(&config)?;
    if clear_job(&store, &config.job.id)? {
        println!("Cleared checkpoint for job '{}'", config.job.id);
    } else {
        println!("No checkpoint for job '{}'", config.job.id);
    }
    Ok(())
}

fn handle_status(path: &Path) -> anyhow::Result<()> {
    let (config, _) = load(path)?;
    let store = checkpoint_store(&config)?;
    match store.load(&config.job.id)? {
        Some(checkpoint) => print_checkpoint_status(&checkpoint),
        None => println!("No checkpoint for job '{}'", config.job.id),
    }
    Ok(())
}

/// Validates the job file and shows what would be crawled
fn handle_check(path: &Path) -> anyhow::Result<()> {
    let (config, hash) = load(path)?;

    println!("=== Shelfscan Job Check ===\n");

    println!("Job:");
    println!("  Id: {}", config.job.id);
    println!("  Checkpoint dir: {}", config.job.checkpoint_dir);
    println!("  Concurrent targets: {}", config.job.max_concurrent_targets);
    println!("  Default max pages: {}", config.job.max_pages);
    println!("  Config hash: {}", hash);

    println!("\nThrottle:");
    println!(
        "  Delay: {}-{}ms (+{}ms jitter)",
        config.throttle.min_delay_ms, config.throttle.max_delay_ms, config.throttle.jitter_ms
    );
    println!(
        "  Escalate above {:.0}% blocks, up to x{}",
        config.throttle.high_block_rate * 100.0,
        config.throttle.max_escalation
    );

    println!("\nIdentities ({}):", config.identity.profiles.len());
    for profile in &config.identity.profiles {
        println!("  - {} ({})", profile.name, profile.locale);
    }

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        let strategies: Vec<&str> = shelfscan::extract::StrategySelector::for_site(site)
            .strategies()
            .iter()
            .map(|s| s.as_str())
            .collect();
        println!("  - {} [store {}]: {}", site.key, site.store, strategies.join(", "));
    }

    println!("\nTargets ({}):", config.targets.len());
    for target in &config.targets {
        println!(
            "  - {} (max pages: {})",
            target.id(),
            target.max_pages.unwrap_or(config.job.max_pages)
        );
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    Ok(())
}
