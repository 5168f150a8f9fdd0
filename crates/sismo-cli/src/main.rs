use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use sismo_core::IngestionStrategy;
use sismo_storage::open_table_store;
use sismo_sync::{run_sync_once_from_env, SyncConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sismo")]
#[command(about = "Sync the latest IGP earthquake reports into a snapshot table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch once and replace the whole table with the new snapshot.
    Sync {
        /// Override the configured ingestion strategy (api|html).
        #[arg(long)]
        strategy: Option<IngestionStrategy>,
        /// Invocation event as JSON; accepted and ignored.
        #[arg(long)]
        event: Option<String>,
    },
    /// Print the rows currently held by the table.
    Show,
    /// Create the backing table if it does not exist.
    Migrate,
}

fn init_tracing(default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("building log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SyncConfig::load()?;
    init_tracing(&config.log_level)?;

    let command = cli.command.unwrap_or(Commands::Sync {
        strategy: None,
        event: None,
    });

    match command {
        Commands::Sync { strategy, event } => {
            let event: JsonValue = match event.as_deref() {
                Some(raw) => serde_json::from_str(raw).context("parsing --event JSON")?,
                None => JsonValue::Null,
            };
            debug!(%event, "invocation event");

            let run = run_sync_once_from_env(strategy).await?;
            info!(
                run_id = %run.summary.run_id,
                status = run.summary.status_code,
                deleted = run.summary.deleted_rows,
                inserted = run.summary.inserted_rows,
                "sync finished"
            );
            println!("{}", serde_json::to_string_pretty(&run.result)?);
            if !run.result.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Show => {
            let store = open_table_store(&config.store_url, &config.table_name).await?;
            let mut rows = store.scan_all().await?;
            sismo_core::sort_by_sequence(&mut rows);
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Migrate => {
            let store = open_table_store(&config.store_url, &config.table_name).await?;
            store.ensure_table().await?;
            eprintln!("table ready: {}", store.describe());
        }
    }

    Ok(ExitCode::SUCCESS)
}
