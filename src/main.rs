mod aggregator;
mod api;
mod config;
mod db;
mod error;
mod models;
mod parser;
mod rest;
mod store;
mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::store::Backend;

/// Sync Dune wallet/transaction exports with a backend and raise token alerts
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report tokens crossing the alert thresholds and flag their transactions
    Alert {
        /// Evaluate without flagging anything
        #[arg(long)]
        dry_run: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upsert a transaction CSV export
    UploadTxns { csv: PathBuf },
    /// Replace potential wallets from a CSV export
    UploadWallets { csv: PathBuf },
    /// Print rows of a table as JSON
    Dump {
        table: String,
        /// Comma-separated column list
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Serve the read-only HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr) // stdout is reserved for reports
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load()?;
    let backend = store::connect(&cfg)?;
    info!("Connected to {:?} backend", cfg.backend);

    run(cli.command, &cfg, backend)
}

fn run(command: Command, cfg: &config::Config, backend: Arc<dyn Backend>) -> Result<()> {
    match command {
        Command::Alert { dry_run, json } => {
            let report = if dry_run {
                aggregator::preview(backend.as_ref(), &cfg.thresholds)?
            } else {
                aggregator::aggregate_and_flag(backend.as_ref(), &cfg.thresholds)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_empty() {
                info!("No token crossed the alert thresholds");
            } else {
                print!("{}", report);
            }
            info!("{} token(s) reported", report.len());
        }
        Command::UploadTxns { csv } => {
            let summary = upload::upload_transactions(backend.as_ref(), &csv)?;
            println!("{}", serde_json::to_string(&summary)?);
        }
        Command::UploadWallets { csv } => {
            let summary = upload::upload_wallets(backend.as_ref(), &csv)?;
            println!("{}", serde_json::to_string(&summary)?);
        }
        Command::Dump { table, columns, limit } => {
            let columns = (!columns.is_empty()).then_some(columns.as_slice());
            let rows = backend.select_rows(&table, columns, limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Serve { port } => {
            let state = api::AppState {
                backend: backend.clone(),
                thresholds: cfg.thresholds.clone(),
            };
            let port = port.unwrap_or(cfg.port);

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                tokio::select! {
                    res = api::serve(state, port) => res,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received, stopping...");
                        Ok(())
                    }
                }
            })?;
            // shut the runtime down before the backend handle is released
            drop(rt);
        }
    }

    Ok(())
}
