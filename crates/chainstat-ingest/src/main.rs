//! chainstat command line.
//!
//! Fetches blocks of a chain into batch files and computes statistics over
//! the stored files.
//!
//! # Usage
//!
//! ```bash
//! # Fetch XRP ledgers into data/xrp-<first>--<last>.jsonl.gz
//! chainstat xrp fetch -o data/xrp.jsonl.gz --start 54387273 --end 54487272
//!
//! # Count transactions per hour
//! chainstat xrp count-transactions-over-time -p 'data/xrp-*.jsonl.gz' --duration 1h
//!
//! # Run several aggregators in one pass
//! chainstat tezos bulk-process -c bulk.json -o results.json.gz
//!
//! # EOS token transfers as CSV
//! chainstat eos export-transfers -p 'data/eos-*.jsonl.gz' -o transfers.csv
//! ```
//!
//! # Graceful Shutdown
//!
//! Ctrl+C during `fetch` stops issuing requests, lets in-flight ones finish
//! and closes connections cleanly. Offline commands exit with the process.

use anyhow::{Context, Result, bail};
use chainstat_core::AggregatorRegistry;
use chainstat_core::metrics::{init_metrics, start_metrics_server};
use chainstat_ingest::commands::{
    check_missing, export, export_transfers, run_aggregator, write_result,
};
use chainstat_ingest::{Blockchain, BulkConfig, BulkRunner, Eos, PipelineConfig, Tezos, Xrp};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Blockchain data fetcher and statistics.
#[derive(Parser, Debug)]
#[command(name = "chainstat")]
#[command(about = "Fetch blockchain data and compute statistics over it")]
#[command(version)]
struct Args {
    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0", global = true)]
    metrics_port: u16,

    #[command(subcommand)]
    chain: Chain,
}

#[derive(Subcommand, Debug)]
enum Chain {
    /// XRP Ledger (websocket, endpoint from XRP_WS_URI)
    Xrp {
        #[command(subcommand)]
        command: Command,
    },
    /// Tezos (HTTP RPC, endpoint from TEZOS_RPC_ENDPOINT)
    Tezos {
        #[command(subcommand)]
        command: Command,
    },
    /// EOS (HTTP chain API, endpoint from EOS_PRODUCER_URL)
    Eos {
        #[command(subcommand)]
        command: EosCommand,
    },
}

#[derive(Subcommand, Debug)]
enum EosCommand {
    #[command(flatten)]
    Common(Command),

    /// Write token transfers to a CSV file
    ExportTransfers {
        #[command(flatten)]
        input: IngestArgs,

        /// Output file, e.g. transfers.csv.gz
        #[arg(long, short)]
        output: PathBuf,
    },
}

/// Input selection shared by the offline commands.
#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// Glob pattern of the input files
    #[arg(long, short)]
    pattern: String,

    /// First block to include (0 = unbounded)
    #[arg(long, default_value = "0")]
    start: u64,

    /// Last block to include (0 = unbounded)
    #[arg(long, default_value = "0")]
    end: u64,

    /// File-decoding threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,
}

impl IngestArgs {
    fn pipeline(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.pattern).with_range(self.start, self.end);
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch [start, end] into batch files
    Fetch {
        /// Base output path, e.g. data/xrp.jsonl.gz
        #[arg(long, short)]
        output: String,

        #[arg(long)]
        start: u64,

        #[arg(long)]
        end: u64,
    },

    /// List the blocks of [start, end] absent from the input files
    Check {
        #[command(flatten)]
        input: IngestArgs,

        /// File receiving the missing block numbers
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Total number of transactions
    CountTransactions {
        #[command(flatten)]
        input: IngestArgs,

        /// Result file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Group actions by name, sender or receiver
    GroupActions {
        #[command(flatten)]
        input: IngestArgs,

        #[arg(long, default_value = "name")]
        by: String,

        /// Break every group down by name, sender and receiver
        #[arg(long)]
        detailed: bool,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Group actions per time bucket
    GroupActionsOverTime {
        #[command(flatten)]
        input: IngestArgs,

        #[arg(long, default_value = "name")]
        by: String,

        /// Bucket size, e.g. 1h or 30m
        #[arg(long)]
        duration: String,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Transaction count per time bucket
    CountTransactionsOverTime {
        #[command(flatten)]
        input: IngestArgs,

        /// Bucket size, e.g. 1h or 30m
        #[arg(long)]
        duration: String,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Run the processors of a bulk configuration in one pass
    BulkProcess {
        /// Bulk configuration (JSON)
        #[arg(long, short)]
        config: PathBuf,

        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Re-encode JSON-lines files as MessagePack (.dat)
    Export {
        #[command(flatten)]
        input: IngestArgs,

        /// Output file, e.g. data/xrp.dat.gz
        #[arg(long, short)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("chainstat_ingest=debug".parse()?),
        )
        .init();

    // Both ring and aws-lc-rs may be linked in; pick one explicitly.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let args = Args::parse();

    if args.metrics_port > 0 {
        let handle = init_metrics().context("Metrics recorder already installed")?;
        start_metrics_server(args.metrics_port, handle)
            .await
            .with_context(|| {
                format!("Failed to start metrics server on port {}", args.metrics_port)
            })?;
    }

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    match args.chain {
        Chain::Xrp { command } => run(Xrp::from_env(), command, shutdown).await,
        Chain::Tezos { command } => run(Tezos::from_env(), command, shutdown).await,
        Chain::Eos {
            command: EosCommand::Common(command),
        } => run(Eos::from_env(), command, shutdown).await,
        Chain::Eos {
            command: EosCommand::ExportTransfers { input, output },
        } => {
            let chain = Arc::new(Eos::from_env());
            tokio::task::spawn_blocking(move || {
                export_transfers(chain, &input.pipeline(), &output)
                    .with_context(|| format!("Failed to export transfers to {}", output.display()))
            })
            .await
            .context("Command thread panicked")??;
            Ok(())
        }
    }
}

async fn run<C: Blockchain>(chain: C, command: Command, shutdown: CancellationToken) -> Result<()> {
    let chain = Arc::new(chain);

    if let Command::Fetch { output, start, end } = command {
        let stats = chain
            .fetch_data(&output, start, end, shutdown)
            .await
            .with_context(|| {
                format!("Failed to fetch {} blocks {}..={}", chain.name(), start, end)
            })?;

        tracing::info!("═══════════════════════════════════════════════════════");
        tracing::info!("FETCH {}", if stats.interrupted { "INTERRUPTED" } else { "COMPLETE" });
        tracing::info!("═══════════════════════════════════════════════════════");
        tracing::info!("Blocks fetched:  {}", stats.fetched);
        tracing::info!("Blocks failed:   {}", stats.failed);
        tracing::info!("Batches written: {}", stats.batches);
        return Ok(());
    }

    tokio::task::spawn_blocking(move || run_offline(chain, command))
        .await
        .context("Command thread panicked")?
}

fn run_offline<C: Blockchain>(chain: Arc<C>, command: Command) -> Result<()> {
    let registry = AggregatorRegistry::with_defaults();

    match command {
        Command::Fetch { .. } => bail!("fetch runs on the async runtime"),
        Command::Check { input, output } => {
            check_missing(chain, &input.pipeline(), &output)
                .with_context(|| format!("Failed to check {}", input.pattern))?;
            Ok(())
        }
        Command::CountTransactions { input, output } => aggregate(
            chain,
            &registry,
            "count-transactions",
            Value::Null,
            &input,
            output.as_deref(),
        ),
        Command::GroupActions {
            input,
            by,
            detailed,
            output,
        } => aggregate(
            chain,
            &registry,
            "group-actions",
            json!({"By": by, "Detailed": detailed}),
            &input,
            output.as_deref(),
        ),
        Command::GroupActionsOverTime {
            input,
            by,
            duration,
            output,
        } => aggregate(
            chain,
            &registry,
            "group-actions-over-time",
            json!({"By": by, "Duration": duration}),
            &input,
            output.as_deref(),
        ),
        Command::CountTransactionsOverTime {
            input,
            duration,
            output,
        } => aggregate(
            chain,
            &registry,
            "count-transactions-over-time",
            json!({"Duration": duration}),
            &input,
            output.as_deref(),
        ),
        Command::BulkProcess {
            config,
            output,
            workers,
        } => {
            let bulk = BulkConfig::from_file(&config).with_context(|| {
                format!("Failed to load bulk configuration {}", config.display())
            })?;
            let mut pipeline = PipelineConfig::default();
            if let Some(workers) = workers {
                pipeline.workers = workers;
            }
            let report = BulkRunner::new(registry)
                .with_pipeline(pipeline)
                .run(chain, &bulk)?;
            emit(&report, output.as_deref())
        }
        Command::Export { input, output } => {
            export(chain, &input.pipeline(), &output)
                .with_context(|| format!("Failed to export to {}", output.display()))?;
            Ok(())
        }
    }
}

/// Build a single aggregator through the registry and run it over `input`.
fn aggregate<C: Blockchain>(
    chain: Arc<C>,
    registry: &AggregatorRegistry,
    kind: &str,
    params: Value,
    input: &IngestArgs,
    output: Option<&Path>,
) -> Result<()> {
    let mut aggregator = registry.create(kind, kind, &params)?;
    run_aggregator(chain, &input.pipeline(), aggregator.as_mut())?;
    emit(&aggregator.result(), output)
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            write_result(value, path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Result written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
