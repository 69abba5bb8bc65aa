//! Alchemist Ingest - bulk card snapshot ingestion tool

use alchemist_common::logging::{init_logging, LogConfig, LogLevel};
use alchemist_ingest::{
    CardStore, InMemoryCardStore, IngestConfig, IngestionOrchestrator, IngestionReport,
    ProgressBarObserver,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "alchemist-ingest")]
#[command(author, version, about = "Bulk card snapshot ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Snapshot cache directory (overrides INGEST_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Records per upsert batch (overrides INGEST_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a snapshot into the cache and print its path
    Download {
        /// Snapshot type, e.g. all_cards or default_cards
        snapshot_type: Option<String>,
    },

    /// Ingest the newest cached snapshot
    Sync {
        /// Ingest this file instead of the newest cached snapshot
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Keep records in memory instead of writing to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Download if needed, then ingest
    Run {
        snapshot_type: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: Cli) -> Result<()> {
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("alchemist-ingest")
        .build()
        .apply_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    config.validate()?;

    match cli.command {
        Command::Download { snapshot_type } => {
            let snapshot_type = snapshot_type.unwrap_or_else(|| config.snapshot_type.clone());
            let mut orchestrator = build_orchestrator(config, Arc::new(InMemoryCardStore::new()))?;
            let snapshot = orchestrator.acquire_snapshot(&snapshot_type).await?;
            println!("{}", snapshot.path.display());
        },
        Command::Sync { file, dry_run } => {
            let store = open_store(&config, dry_run).await?;
            let mut orchestrator = build_orchestrator(config, store)?;
            let report = match file {
                Some(path) => orchestrator.ingest_file(&path).await?,
                None => orchestrator.sync_latest().await?,
            };
            print_report(&report);
        },
        Command::Run {
            snapshot_type,
            dry_run,
        } => {
            let snapshot_type = snapshot_type.unwrap_or_else(|| config.snapshot_type.clone());
            let store = open_store(&config, dry_run).await?;
            let mut orchestrator = build_orchestrator(config, store)?;
            let report = orchestrator.run(&snapshot_type).await?;
            print_report(&report);
        },
    }

    Ok(())
}

fn build_orchestrator(
    config: IngestConfig,
    store: Arc<dyn CardStore>,
) -> Result<IngestionOrchestrator> {
    let orchestrator = IngestionOrchestrator::new(config, store)?
        .with_observer(Arc::new(ProgressBarObserver::new()));
    cancel_on_ctrl_c(orchestrator.cancellation_token());
    Ok(orchestrator)
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn open_store(config: &IngestConfig, dry_run: bool) -> Result<Arc<dyn CardStore>> {
    if dry_run {
        info!("Dry run: records are kept in memory only");
        return Ok(Arc::new(InMemoryCardStore::new()));
    }

    #[cfg(feature = "database")]
    {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set (or pass --dry-run)")?;
        let store =
            alchemist_ingest::PgCardStore::connect(url, config.database_max_connections).await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "database"))]
    {
        let _ = config;
        anyhow::bail!("Built without database support; pass --dry-run")
    }
}

fn print_report(report: &IngestionReport) {
    info!(
        run_id = %report.run_id,
        path = %report.snapshot_path.display(),
        "Run finished"
    );
    println!("Processed {} records", report.records_committed);
}
