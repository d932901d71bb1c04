//! # docshift CLI
//!
//! `docshift migrate` runs the master; it re-executes this binary with the
//! hidden `worker` subcommand for every worker process.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{info, Instrument};

use docshift::config::MigrationConfig;
use docshift::logging;
use docshift::orchestration::{run_migration, MigrationJob, ProcessSpawner};
use docshift::provider::DefaultConnector;
use docshift::transform::load_script;
use docshift::worker::{run_worker, WorkerContext};

#[derive(Parser, Debug)]
#[command(name = "docshift")]
#[command(about = "Chunked, multi-process document migrations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Migrate every document matching the script's selector
    Migrate(MigrateArgs),

    /// Serve the worker protocol on stdin/stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Database to migrate
    #[arg(short, long)]
    database: Option<String>,

    /// Migration script (default: ./migrate.json)
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Configuration file (default: ./docshift.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker processes
    #[arg(short, long)]
    workers: Option<usize>,

    /// Documents per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Directory for diff ledger files
    #[arg(long)]
    ledger_dir: Option<PathBuf>,

    /// Requeue chunks held longer than this many milliseconds
    #[arg(long)]
    chunk_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_with_verbosity(cli.verbose);

    let result = match cli.command {
        Commands::Migrate(args) => migrate(args).await,
        Commands::Worker => worker().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("docshift: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn migrate(args: MigrateArgs) -> anyhow::Result<()> {
    let mut config =
        MigrationConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_name = Some(database);
    }
    if let Some(script) = args.script {
        config.script_path = script;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(ledger_dir) = args.ledger_dir {
        config.ledger_dir = ledger_dir;
    }
    if args.chunk_timeout_ms.is_some() {
        config.chunk_timeout_ms = args.chunk_timeout_ms;
    }
    config.validate()?;

    let script = load_script(&config.script_path)?;
    let job = MigrationJob::from_config(&config, script)?;
    let spawner = ProcessSpawner::current_exe().context("cannot locate the docshift executable")?;

    let report = run_migration(&job, &DefaultConnector, &spawner).await?;
    info!(
        documents = report.document_count,
        chunks = report.chunk_count,
        "Migration complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn worker() -> anyhow::Result<()> {
    let worker_id = std::env::var("DOCSHIFT_WORKER_ID").unwrap_or_else(|_| "-".to_string());
    let span = tracing::info_span!("worker", worker_id = %worker_id, pid = std::process::id());

    let ctx = WorkerContext::new(Arc::new(DefaultConnector));
    run_worker(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), ctx)
        .instrument(span)
        .await?;
    Ok(())
}
