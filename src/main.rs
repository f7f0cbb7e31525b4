//! Geo-Harvester main entry point
//!
//! This is the command-line interface for the Geo-Harvester hierarchy crawler.

use anyhow::{Context, Result};
use clap::Parser;
use geo_harvester::config::{load_config_with_hash, Config};
use geo_harvester::crawler::{CrawlOptions, HierarchyCrawler, HttpFetchSession, Suspender};
use geo_harvester::output::{load_statistics, print_statistics, StatsReader};
use geo_harvester::session::{SessionCookie, SessionGate};
use geo_harvester::state::{HaltReason, RunReport};
use geo_harvester::storage::{open_table_store, OffsetTracker};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Geo-Harvester: a resumable hierarchical crawler
///
/// Walks countries, cities, locations and the items inside each location,
/// persisting every level as it goes so an interrupted run picks up where
/// it stopped.
#[derive(Parser, Debug)]
#[command(name = "geo-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A resumable hierarchical crawler", long_about = None)]
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

    /// Re-enumerate every level, even parents that already have children
    #[arg(long)]
    fresh: bool,

    /// Limit the run to these country codes (repeatable)
    #[arg(long = "country", value_name = "CODE")]
    countries: Vec<String>,

    /// Validate config and show what would be fetched without fetching
    #[arg(long, conflicts_with_all = ["stats", "import_session", "reset_offset"])]
    dry_run: bool,

    /// Show statistics from storage and exit
    #[arg(long, conflicts_with_all = ["dry_run", "import_session", "reset_offset"])]
    stats: bool,

    /// Store cookies from a JSON file as the authenticated session and exit
    #[arg(long, value_name = "FILE", conflicts_with_all = ["dry_run", "stats", "reset_offset"])]
    import_session: Option<PathBuf>,

    /// Discard the saved offset of a location and exit
    #[arg(
        long,
        value_name = "LOCATION_ID",
        conflicts_with_all = ["dry_run", "stats", "import_session"]
    )]
    reset_offset: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let options = CrawlOptions {
        fresh: cli.fresh,
        countries: cli.countries.clone(),
    };

    if cli.dry_run {
        handle_dry_run(config, &config_hash, &options)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(path) = &cli.import_session {
        handle_import_session(&config, path)?;
    } else if let Some(location_id) = &cli.reset_offset {
        handle_reset_offset(&config, location_id)?;
    } else {
        return handle_harvest(config, &config_hash, &options).await;
    }

    Ok(ExitCode::SUCCESS)
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("geo_harvester=info,warn"),
            1 => EnvFilter::new("geo_harvester=debug,info"),
            2 => EnvFilter::new("geo_harvester=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be fetched
fn handle_dry_run(config: Config, config_hash: &str, options: &CrawlOptions) -> Result<()> {
    println!("=== Geo-Harvester Dry Run ===\n");

    println!("Crawler:");
    println!("  Page cap: {}", config.crawler.page_cap);
    println!("  Leaf batch limit: {}", config.crawler.leaf_batch_limit);
    println!("  Guest mode allowed: {}", config.crawler.allow_guest);
    println!("  Forced pause after block: {}s", config.crawler.forced_pause_secs);
    println!(
        "  Max consecutive blocks: {}",
        config.crawler.max_consecutive_blocks
    );

    println!("\nThrottle:");
    println!(
        "  Cooldown of {}s every {} requests",
        config.throttle.cooldown_secs, config.throttle.request_threshold
    );

    println!("\nPacing:");
    for (name, window) in [
        ("Night", config.pacing.night),
        ("Morning", config.pacing.morning),
        ("Day", config.pacing.day),
        ("Evening", config.pacing.evening),
        ("Sibling", config.pacing.sibling),
    ] {
        println!("  {:<8} {}-{}ms", name, window.min_ms, window.max_ms);
    }
    println!("  Break probability: {}", config.pacing.break_probability);

    println!("\nStorage:");
    println!("  Data dir: {}", config.storage.data_dir);
    println!("  Backend: {:?}", config.storage.backend);
    println!("  Session: {}", config.session.path);

    let store = open_table_store(&config.storage)?;
    let crawler = HierarchyCrawler::new(config, config_hash, store);
    let urls = crawler.planned_urls(options)?;

    println!("\nPlanned entry points ({}):", urls.len());
    for url in &urls {
        println!("  - {}", url);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from storage
fn handle_stats(config: &Config) -> Result<()> {
    let store = open_table_store(&config.storage)?;
    let reader = StatsReader::new(store, config.storage.cache_max_age_days);
    let stats = load_statistics(&reader)?;
    print_statistics(&stats);
    Ok(())
}

/// Handles --import-session: completes manual authentication from exported cookies
fn handle_import_session(config: &Config, path: &Path) -> Result<()> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cookies from {}", path.display()))?;
    let cookies: Vec<SessionCookie> =
        serde_json::from_str(&body).context("Cookie file must be a JSON array of cookies")?;
    anyhow::ensure!(!cookies.is_empty(), "Cookie file contains no cookies");

    let gate = SessionGate::new(&config.session, config.crawler.allow_guest);
    gate.complete_manual_auth(cookies)?;
    println!("✓ Session stored at {}", gate.path().display());
    Ok(())
}

/// Handles --reset-offset: the only way to move a location's cursor back
fn handle_reset_offset(config: &Config, location_id: &str) -> Result<()> {
    let store = open_table_store(&config.storage)?;
    if OffsetTracker::new(store).reset(location_id)? {
        println!("✓ Offset for location {} reset", location_id);
    } else {
        println!("No offset recorded for location {}", location_id);
    }
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: Config,
    config_hash: &str,
    options: &CrawlOptions,
) -> Result<ExitCode> {
    if options.fresh {
        tracing::info!("Starting fresh harvest (re-enumerating every level)");
    } else {
        tracing::info!("Starting harvest (resuming from persisted state)");
    }
    if !options.countries.is_empty() {
        tracing::info!("Limited to countries: {}", options.countries.join(", "));
    }

    let store = open_table_store(&config.storage)?;
    let mut session = HttpFetchSession::new(&config.platform)?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next suspension point");
            signal_token.cancel();
        }
    });

    let mut crawler =
        HierarchyCrawler::new(config, config_hash, store).with_suspender(Suspender::new(token));

    let report = match crawler.run(&mut session, options).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            return Err(e.into());
        }
    };

    print_summary(&report);
    Ok(exit_code(&report))
}

fn print_summary(report: &RunReport) {
    println!("\n=== Run {} ===", report.status);
    println!(
        "Added: {} countries, {} cities, {} locations, {} leaf items",
        report.countries.added, report.cities.added, report.locations.added, report.leaf_items.added
    );
    println!(
        "Requests: {}, cache hits: {}, cooldowns: {}",
        report.requests, report.cache_hits, report.cooldowns
    );
    if let Some(halt) = &report.halt {
        println!("Halted: {}", halt);
    }
    if !report.issues.is_empty() {
        println!("{} branch(es) left for a later run; see --stats", report.issues.len());
    }
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.halt {
        Some(HaltReason::PersistentBlock) | Some(HaltReason::AuthRequired) => ExitCode::from(2),
        Some(HaltReason::TransportClosed(_)) => ExitCode::FAILURE,
        Some(HaltReason::Cancelled) | None => ExitCode::SUCCESS,
    }
}
