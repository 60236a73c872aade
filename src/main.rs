//! FIPE Harvest main entry point
//!
//! This is the command-line interface for the resumable FIPE catalog harvester.

use clap::Parser;
use fipe_harvest::config::{load_config_with_hash, Config};
use fipe_harvest::crawler::{run_harvest, RunOutcome};
use fipe_harvest::output::emit_continue_flag;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// FIPE Harvest: a resumable vehicle price catalog harvester
///
/// Each invocation advances the harvest within a time budget and checkpoints
/// progress in SQLite. When everything is harvested the catalog is exported;
/// otherwise `continue_execution=true` tells the scheduler to run it again.
#[derive(Parser, Debug)]
#[command(name = "fipe-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable FIPE catalog harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Clear all checkpoints before harvesting
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with_all = ["stats", "fresh"])]
    dry_run: bool,

    /// Show statistics from the checkpoint database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_harvest(config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fipe_harvest=info,warn"),
            1 => EnvFilter::new("fipe_harvest=debug,info"),
            2 => EnvFilter::new("fipe_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== FIPE Harvest Dry Run ===\n");

    println!("Harvest:");
    println!(
        "  Budget: {} minutes",
        config.harvest.max_execution_minutes
    );
    match config.harvest.max_units {
        Some(units) => println!("  Unit cap: {}", units),
        None => println!("  Unit cap: none"),
    }
    let categories: Vec<_> = config
        .harvest
        .categories
        .iter()
        .map(|c| c.to_string())
        .collect();
    println!("  Categories: {}", categories.join(", "));

    println!("\nAPI:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Referer: {}", config.api.referer);
    println!("  Timeout: {}s", config.api.timeout_secs);

    println!("\nPacing:");
    println!(
        "  Delay: {}ms (min {}ms, max {}ms, jitter ±{:.0}%)",
        config.pacing.initial_delay_ms,
        config.pacing.min_delay_ms,
        config.pacing.max_delay_ms,
        config.pacing.jitter * 100.0
    );
    println!(
        "  Retries: {} attempts, backoff {:?}ms",
        config.pacing.max_attempts, config.pacing.backoff_schedule_ms
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Export directory: {}", config.output.export_dir);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use fipe_harvest::output::{load_statistics, print_statistics};
    use fipe_harvest::storage::SqliteStore;

    println!("Database: {}\n", config.output.database_path);

    let store = SqliteStore::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation and signals the scheduler
async fn handle_harvest(
    config: Config,
    config_hash: &str,
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if fresh {
        tracing::info!("Starting fresh harvest (ignoring previous checkpoints)");
    } else {
        tracing::info!("Starting harvest (resuming from checkpoints if present)");
    }

    let outcome = match run_harvest(config, config_hash, fresh).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            return Err(e.into());
        }
    };

    match &outcome {
        RunOutcome::Completed { export } => {
            tracing::info!("Catalog exported to {}", export.dir.display())
        }
        RunOutcome::MoreWorkRemains { reason, .. } => {
            tracing::info!("More work remains ({})", reason)
        }
    }

    let output_file = std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from);
    emit_continue_flag(output_file.as_deref(), outcome.more_work_remains())?;

    Ok(())
}
