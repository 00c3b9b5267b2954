use ats_common::{
    init_logging, AppConfig, DeletionPolicy, IngestionStatus, LogFormat, Result, RunOptions,
};
use ats_indexing::{
    exit_code_for_error, ChangeSet, DirectoryScanner, FileOutcome, HttpIngestor,
    IngestionCoordinator, ProgressFn, RunReport,
};
use ats_storage::{open_state_store, StateStore};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Incremental resume ingestion for the ATS knowledge base", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "INDEXER_CONFIG")]
    config: PathBuf,

    /// Log level or filter directive (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, value_parser = ["console", "json"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest new and modified resumes, checkpointing after every batch
    Run(RunArgs),
    /// Show what a run would ingest without contacting the service
    Plan(PlanArgs),
    /// Summarize the persisted ingestion state
    Status(StatusArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Source directory (defaults to ingestion.source_dir)
    directory: Option<PathBuf>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Re-ingest files whose content has not changed
    #[arg(short, long)]
    force: bool,

    /// Forget documents whose source file was removed
    #[arg(long)]
    prune_deleted: bool,

    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(long)]
    no_lock: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PlanArgs {
    directory: Option<PathBuf>,

    #[arg(short, long)]
    force: bool,

    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = if config_found {
        match AppConfig::from_file(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ {}", e);
                return exit_code_for_error(&e);
            }
        }
    } else {
        AppConfig::default()
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    match cli.log_format.as_deref() {
        Some("json") => config.logging.format = LogFormat::Json,
        Some(_) => config.logging.format = LogFormat::Console,
        None => {}
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("❌ {}", e);
        return exit_code_for_error(&e);
    }

    if config_found {
        info!("📄 Using config: {}", cli.config.display());
    } else {
        warn!(
            "Config file {} not found, using defaults",
            cli.config.display()
        );
    }

    let result = match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Plan(args) => plan(config, args).await,
        Command::Status(args) => status(config, args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {}", e);
            exit_code_for_error(&e)
        }
    }
}

async fn run(mut config: AppConfig, args: RunArgs) -> Result<ExitCode> {
    if let Some(directory) = args.directory {
        config.ingestion.source_dir = directory;
    }
    if let Some(batch_size) = args.batch_size {
        config.ingestion.batch_size = batch_size;
    }
    if args.force {
        config.ingestion.force_reingest = true;
    }
    if args.prune_deleted {
        config.ingestion.deletion_policy = DeletionPolicy::Purge;
    }
    if let Some(state) = args.state {
        config.state.path = state;
    }
    if args.no_lock {
        config.state.use_lock = false;
    }
    config.validate()?;

    let options = RunOptions::from_config(&config.ingestion)?;
    let store = Arc::new(open_state_store(&config.state));
    let ingestor = Arc::new(HttpIngestor::new(&config.service)?);
    let scanner = DirectoryScanner::from_config(&config.ingestion);

    let progress: ProgressFn = Arc::new(|path: &Path, outcome: &FileOutcome| match outcome {
        FileOutcome::Succeeded { metadata, .. } => info!(
            "✅ {} ({})",
            path.display(),
            metadata.candidate_name.as_deref().unwrap_or("unknown candidate")
        ),
        FileOutcome::Failed { error } => error!("❌ {}: {}", path.display(), error),
        FileOutcome::Cancelled => {}
    });

    let mut coordinator = IngestionCoordinator::new(store, ingestor, scanner).with_progress(progress);
    if config.state.use_lock {
        coordinator = coordinator.with_run_lock(config.state.path.clone());
    }

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing the current batch");
            cancel.cancel();
        }
    });

    info!(
        "🚀 Ingesting {} (batch size {}, force {})",
        options.directory().display(),
        options.batch_size(),
        options.force_reingest()
    );
    let report = coordinator.run(&options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(ExitCode::from(&report))
}

async fn plan(mut config: AppConfig, args: PlanArgs) -> Result<ExitCode> {
    if let Some(directory) = args.directory {
        config.ingestion.source_dir = directory;
    }
    if args.force {
        config.ingestion.force_reingest = true;
    }
    if let Some(state) = args.state {
        config.state.path = state;
    }
    config.validate()?;

    let options = RunOptions::from_config(&config.ingestion)?;
    let store = Arc::new(open_state_store(&config.state));
    let ingestor = Arc::new(HttpIngestor::new(&config.service)?);
    let coordinator = IngestionCoordinator::new(
        store,
        ingestor,
        DirectoryScanner::from_config(&config.ingestion),
    );

    let changes = coordinator.plan(&options).await?;
    print_plan(&changes);
    Ok(ExitCode::SUCCESS)
}

async fn status(mut config: AppConfig, args: StatusArgs) -> Result<ExitCode> {
    if let Some(state) = args.state {
        config.state.path = state;
    }

    let store = open_state_store(&config.state);
    let snapshot = store.load().await?;
    let counts = snapshot.status_counts();
    let failed: Vec<_> = snapshot
        .files
        .values()
        .filter(|record| record.status == IngestionStatus::Failed)
        .collect();

    if args.json {
        let body = serde_json::json!({
            "state": store.location(),
            "tracked": snapshot.len(),
            "counts": counts,
            "failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("State: {}", store.location());
    println!(
        "Tracked: {}  succeeded: {}  failed: {}  pending: {}",
        snapshot.len(),
        counts.succeeded,
        counts.failed,
        counts.pending
    );
    for record in failed {
        println!(
            "  ❌ {}: {}",
            record.path,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport) {
    println!("Ingestion run {} over {}", report.run_id, report.directory.display());
    println!(
        "  new: {}  modified: {}  retried: {}  reingested: {}  unchanged: {}  failed: {}",
        report.new,
        report.modified,
        report.retried,
        report.reingested,
        report.unchanged,
        report.failed
    );
    if !report.deleted.is_empty() {
        println!("  deleted: {}  purged: {}", report.deleted.len(), report.purged);
    }
    for failure in &report.failures {
        println!("  ❌ {}: {}", failure.path, failure.error);
    }
    if report.cancelled {
        println!("  🛑 cancelled after {} batch(es), rerun to resume", report.batches);
    }
    println!("  took {:.2}s", report.elapsed_secs);
}

fn print_plan(changes: &ChangeSet) {
    if changes.is_noop() {
        println!("Nothing to ingest ({} unchanged)", changes.unchanged.len());
        return;
    }
    for file in &changes.pending {
        println!("  {:<10} {}", file.kind.to_string(), file.key);
    }
    for path in &changes.deleted {
        println!("  {:<10} {}", "deleted", path);
    }
    println!(
        "{} to ingest, {} unchanged, {} deleted",
        changes.pending.len(),
        changes.unchanged.len(),
        changes.deleted.len()
    );
}
