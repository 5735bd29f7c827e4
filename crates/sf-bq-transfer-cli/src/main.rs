//! sf-bq-transfer CLI - batch table transfer from Snowflake to BigQuery.

use clap::{Parser, Subcommand};
use sf_bq_transfer::{Config, RetryPolicy, TransferError, TransferOrchestrator, TransferStats};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when one or more tables failed.
const EXIT_TABLE_FAILED: u8 = 1;

/// Exit code for remote/runtime problems that are not table failures.
const EXIT_RUNTIME: u8 = 4;

/// Exit code when the batch was interrupted.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "sf-bq-transfer")]
#[command(about = "Transfer tables from Snowflake to BigQuery through a GCS bucket")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "transfer.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision staging, then transfer tables
    Run {
        /// Comma-separated tables to transfer (overrides the config file)
        #[arg(long, value_delimiter = ',', conflicts_with = "all")]
        tables: Option<Vec<String>>,

        /// Transfer every table in the source schema
        #[arg(long)]
        all: bool,

        /// Append to destination tables instead of replacing them
        #[arg(long)]
        append: bool,

        /// Stop scheduling tables after the first failure
        #[arg(long)]
        stop_on_error: bool,

        /// Number of tables transferred concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Re-run retryable failures up to N more times
        #[arg(long, default_value = "0")]
        retries: usize,
    },

    /// Provision the staging path and destination dataset only
    Prepare,

    /// Compare source and destination row counts without transferring
    Validate {
        /// Comma-separated tables to check (default: every source table)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,
    },

    /// Test connectivity to both warehouses
    HealthCheck,

    /// List tables in the source schema
    ListTables {
        /// List tables in the destination dataset instead
        #[arg(long)]
        destination: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, TransferError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = load_config(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            tables,
            all,
            append,
            stop_on_error,
            workers,
            retries,
        } => {
            if all {
                config.transfer.tables.clear();
            } else if let Some(tables) = tables {
                config.transfer.tables = tables;
            }
            if append {
                config.transfer.overwrite = false;
            }
            if stop_on_error {
                config.transfer.continue_on_error = false;
            }
            if let Some(w) = workers {
                config.transfer.workers = w;
            }
            config.validate()?;

            let overwrite = config.transfer.overwrite;
            let cancel_token = setup_signal_handler()?;
            let mut orchestrator = TransferOrchestrator::new(config)?.with_cancel(cancel_token);

            let mut stats = orchestrator.run().await?;
            if retries > 0 && !stats.failed.is_empty() && !stats.cancelled {
                let policy = RetryPolicy::with_attempts(retries);
                let recovered = orchestrator
                    .retry_failed(&mut stats, &policy, overwrite)
                    .await?;
                info!("Recovered {} tables on retry", recovered);
            }

            print_stats(&stats, cli.output_json)?;
            Ok(stats_exit_code(&stats))
        }

        Commands::Prepare => {
            let mut orchestrator = TransferOrchestrator::new(config)?;
            let context = orchestrator.prepare().await?;

            if cli.output_json {
                let report = serde_json::json!({
                    "database": context.database,
                    "schema": context.schema,
                    "integration": context.integration(),
                    "stage": context.stage.name,
                    "bucket": context.bucket(),
                    "dataset": orchestrator.request().destination_dataset,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Staging ready:");
                println!("  Schema:      {}.{}", context.database, context.schema);
                println!("  Integration: {}", context.integration());
                println!("  Stage:       {} -> {}", context.stage.name, context.stage.url());
                println!("  Dataset:     {}", orchestrator.request().destination_dataset);
            }
            Ok(0)
        }

        Commands::Validate { tables } => {
            let orchestrator = TransferOrchestrator::new(config)?;
            let checks = orchestrator
                .validate(&tables.unwrap_or_default())
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("Row count validation:");
                for check in &checks {
                    println!(
                        "  {} {}: source={} destination={}",
                        if check.matches { "OK  " } else { "DIFF" },
                        check.table,
                        check.source_rows,
                        check.destination_rows
                    );
                }
            }

            let mismatched = checks.iter().filter(|c| !c.matches).count();
            if mismatched > 0 {
                warn!("{} of {} tables differ", mismatched, checks.len());
                return Ok(EXIT_TABLE_FAILED);
            }
            Ok(0)
        }

        Commands::HealthCheck => {
            let orchestrator = TransferOrchestrator::new(config)?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (Snowflake): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref version) = result.source_version {
                    println!("    Version: {}", version);
                }
                if let Some(exists) = result.source_schema_exists {
                    println!(
                        "    Schema {}.{}: {}",
                        orchestrator.request().source_database,
                        orchestrator.request().source_schema,
                        if exists { "found" } else { "MISSING" }
                    );
                }
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination (BigQuery): {} ({}ms)",
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            Ok(if result.healthy { 0 } else { EXIT_RUNTIME })
        }

        Commands::ListTables { destination } => {
            let orchestrator = TransferOrchestrator::new(config)?;
            let tables = if destination {
                orchestrator.destination_tables().await?
            } else {
                orchestrator.discover_tables().await?
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in &tables {
                    println!("{}", table);
                }
            }
            Ok(0)
        }
    }
}

/// Load the config file, reporting any failure as a configuration error.
fn load_config(path: &Path) -> Result<Config, TransferError> {
    Config::load(path).map_err(|e| match e {
        TransferError::Config(_) => e,
        other => TransferError::Config(format!("cannot load {}: {}", path.display(), other)),
    })
}

fn print_stats(stats: &TransferStats, output_json: bool) -> Result<(), TransferError> {
    if output_json {
        println!("{}", stats.to_json()?);
    } else {
        println!("\n{}", stats.summary());
    }
    Ok(())
}

fn stats_exit_code(stats: &TransferStats) -> u8 {
    if stats.cancelled {
        EXIT_CANCELLED
    } else if !stats.failed.is_empty() || !stats.skipped.is_empty() {
        EXIT_TABLE_FAILED
    } else {
        0
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for the report
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, TransferError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing in-flight tables, no new tables will start...",
            name
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, TransferError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight tables, no new tables will start...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
