//! CDP Ingest - Command-line ETL runner
//!
//! Runs the same checkpointed pipelines as the server, without the HTTP
//! surface. Useful for cron-driven ingestion and operational poking at
//! checkpoints.

use std::sync::Arc;

use anyhow::Result;
use cdp_common::logging::{init_logging, LogConfig, LogLevel};
use cdp_common::types::SourceTag;
use clap::Parser;
use tracing::info;

use cdp_server::config::Config;
use cdp_server::db;
use cdp_server::etl::{
    build_orchestrator, CheckpointStore, PgCheckpointStore, RunResult,
};

#[derive(Parser, Debug)]
#[command(name = "cdp-ingest")]
#[command(author, version, about = "CDP market data ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the ETL pipelines
    Run {
        /// Single source to run (coingecko, coinpaprika, csv); all when omitted
        #[arg(short, long)]
        source: Option<String>,

        /// Run sources concurrently instead of in canonical order
        #[arg(long)]
        concurrent: bool,
    },

    /// List stored checkpoints
    Checkpoints {
        /// Restrict to one source
        #[arg(short, long)]
        source: Option<SourceTag>,
    },

    /// Delete checkpoints so the next run starts from scratch
    ResetCheckpoints {
        /// Source whose checkpoints to remove
        #[arg(short, long)]
        source: SourceTag,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("cdp-ingest");
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let config = Config::load()?;
    let pool = db::create_pool(&config.database).await?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    match cli.command {
        Command::Run { source, concurrent } => {
            let orchestrator = Arc::new(build_orchestrator(&config.etl, pool)?);

            let results: Vec<RunResult> = match source {
                Some(name) => vec![orchestrator.run_source_by_name(&name).await?],
                None if concurrent => orchestrator
                    .run_all_concurrent()
                    .await
                    .into_values()
                    .collect(),
                None => orchestrator.run_all().await.into_values().collect(),
            };

            let mut failed = 0usize;
            for result in &results {
                info!(
                    source = %result.source,
                    status = %result.status,
                    processed = result.records_processed,
                    loaded = result.records_loaded,
                    skipped = result.records_failed,
                    "run finished"
                );
                println!("{}", serde_json::to_string_pretty(result)?);
                if result.error.is_some() {
                    failed += 1;
                }
            }

            if failed > 0 {
                anyhow::bail!("{failed} of {} source runs failed", results.len());
            }
        },

        Command::Checkpoints { source } => {
            let store = PgCheckpointStore::new(pool);
            let checkpoints = store.list(source).await?;
            if checkpoints.is_empty() {
                println!("no checkpoints stored");
            }
            for cp in checkpoints {
                println!(
                    "{}/{} = {} (updated {})",
                    cp.source, cp.kind, cp.value, cp.updated_at
                );
            }
        },

        Command::ResetCheckpoints { source } => {
            let store = PgCheckpointStore::new(pool);
            let removed = store.clear(source).await?;
            println!("removed {removed} checkpoint(s) for {source}");
        },
    }

    Ok(())
}
