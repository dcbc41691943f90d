//! acct-sync CLI - Batch sync of accounting tables to a remote API.

use acct_sync::{
    Config, DataSource, EntityKind, EntitySpec, EntityStatus, EventSink, FanoutSink,
    HttpTransport, JsonProgressSink, RunStatus, SyncError, SyncPipeline, SyncReport,
    SyncTransport, TracingSink,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "acct-sync")]
#[command(about = "Sync accounting tables from an ODBC source to a remote API")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error [default: logging.level or info]
    #[arg(long)]
    verbosity: Option<String>,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync
    Run {
        /// Sync only these entities (repeatable): users, master, directory, ledger
        #[arg(long = "only", value_name = "ENTITY")]
        only: Vec<String>,

        /// Dry run: fetch and validate without calling the API
        #[arg(long)]
        dry_run: bool,
    },

    /// Test source connection and API reachability
    HealthCheck,

    /// Show the resolved entity plan without connecting anywhere
    Entities,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = setup_logging(
        cli.verbosity
            .as_deref()
            .or(config.logging.level.as_deref())
            .unwrap_or("info"),
        &cli.log_format,
        config.logging.directory.as_deref(),
    )?;

    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Entities => {
            let entities = EntitySpec::resolve_all(&config)?;
            print_entities(&entities, cli.output_json)?;
        }

        Commands::Run { only, dry_run } => {
            let entities = select_entities(&config, &only)?;
            let cancel_token = setup_signal_handler()?;

            let source = build_source(&config)?;
            let transport: Arc<dyn SyncTransport> = Arc::new(HttpTransport::new(&config.api)?);

            let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
            if cli.progress {
                sink = sink.with(Arc::new(JsonProgressSink));
            }
            let events: Arc<dyn EventSink> = Arc::new(sink);

            let pipeline =
                SyncPipeline::new(source, transport, events, config.sync.success_policy)
                    .dry_run(dry_run);
            let report = pipeline.run(&entities, cancel_token).await;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }

            match report.status {
                RunStatus::Completed => {}
                RunStatus::Cancelled => return Err(SyncError::Cancelled),
                RunStatus::Failed => return Err(SyncError::SyncFailed(failure_reason(&report))),
            }
        }

        Commands::HealthCheck => {
            let (source_connected, source_error) = match build_source(&config) {
                Ok(source) => match source.connect().await {
                    Ok(()) => {
                        source.close().await;
                        (true, None)
                    }
                    Err(e) => (false, Some(e.to_string())),
                },
                Err(e) => (false, Some(e.to_string())),
            };

            let transport = HttpTransport::new(&config.api)?;
            let (api_status, api_error) = match transport.probe().await {
                Ok(status) => (Some(status), None),
                Err(e) => (None, Some(e.to_string())),
            };
            let healthy = source_connected && api_status.is_some();

            if cli.output_json {
                let result = serde_json::json!({
                    "source_connected": source_connected,
                    "source_error": source_error,
                    "api_reachable": api_status.is_some(),
                    "api_status": api_status,
                    "api_error": api_error,
                    "healthy": healthy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (ODBC): {}",
                    if source_connected { "OK" } else { "FAILED" }
                );
                if let Some(ref err) = source_error {
                    println!("    Error: {}", err);
                }
                match api_status {
                    Some(status) => println!("  API ({}): OK (HTTP {})", config.api.base_url, status),
                    None => println!("  API ({}): FAILED", config.api.base_url),
                }
                if let Some(ref err) = api_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(SyncError::SyncFailed("health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Resolve `--only` filters, keeping the configured run order.
fn select_entities(config: &Config, only: &[String]) -> Result<Vec<EntitySpec>, SyncError> {
    if only.is_empty() {
        return EntitySpec::resolve_all(config);
    }

    let mut kinds = only
        .iter()
        .map(|s| s.parse::<EntityKind>())
        .collect::<Result<Vec<_>, _>>()?;
    kinds.sort_by_key(|k| {
        let position = config
            .sync
            .order
            .iter()
            .position(|o| o == k)
            .unwrap_or(usize::MAX);
        (position, *k)
    });
    kinds.dedup();

    kinds
        .into_iter()
        .map(|kind| EntitySpec::resolve(kind, config))
        .collect()
}

#[cfg(feature = "odbc")]
fn build_source(config: &Config) -> Result<Arc<dyn DataSource>, SyncError> {
    Ok(Arc::new(acct_sync::OdbcSource::new(&config.source)))
}

#[cfg(not(feature = "odbc"))]
fn build_source(_config: &Config) -> Result<Arc<dyn DataSource>, SyncError> {
    Err(SyncError::Config(
        "ODBC support is not compiled in; rebuild with `--features odbc`".to_string(),
    ))
}

fn failure_reason(report: &SyncReport) -> String {
    if let Some(ref error) = report.error {
        return error.clone();
    }
    if let Some(kind) = report.aborted_by {
        return format!("critical entity {} failed to upload", kind);
    }
    let failed: Vec<&str> = report
        .entities
        .iter()
        .filter(|e| !e.status.is_ok())
        .map(|e| e.entity.name())
        .collect();
    format!("entities did not complete: {}", failed.join(", "))
}

fn print_report(report: &SyncReport) {
    let status_msg = match (report.status, report.dry_run) {
        (RunStatus::Completed, true) => "Dry run completed!",
        (RunStatus::Completed, false) => "Sync completed!",
        (RunStatus::Cancelled, _) => "Sync cancelled.",
        (RunStatus::Failed, _) => "Sync failed!",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Records uploaded: {}", report.records_uploaded);

    if !report.entities.is_empty() {
        println!("  Entities:");
    }
    for entity in &report.entities {
        let status = match entity.status {
            EntityStatus::Uploaded => "uploaded",
            EntityStatus::DryRun => "validated",
            EntityStatus::FetchFailed => "fetch failed",
            EntityStatus::UploadFailed => "upload failed",
            EntityStatus::Skipped => "skipped",
            EntityStatus::Cancelled => "cancelled",
        };
        println!(
            "    {:<10} {:<14} fetched {:>7}  valid {:>7}  rejected {:>5}  uploaded {:>7}",
            entity.entity.name(),
            status,
            entity.fetched,
            entity.validated,
            entity.rejected,
            entity.uploaded
        );
        if let Some(ref err) = entity.error {
            println!("      Error: {}", err);
        }
    }

    if let Some(kind) = report.aborted_by {
        println!("  Aborted by critical entity: {}", kind);
    }
    if let Some(ref err) = report.error {
        println!("  Error: {}", err);
    }
}

fn print_entities(entities: &[EntitySpec], json: bool) -> Result<(), SyncError> {
    if json {
        let list: Vec<_> = entities
            .iter()
            .map(|e| {
                serde_json::json!({
                    "entity": e.name(),
                    "table": e.table,
                    "endpoint": e.endpoint,
                    "batch_size": e.batch_size.get(),
                    "large_threshold": e.large_threshold,
                    "critical": e.critical,
                    "clear_mode": e.clear_mode.to_string(),
                    "columns": e.columns(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!("Entities (in run order):");
    for e in entities {
        println!(
            "  {:<10} {:<16} {:<22} batch {:>5}  threshold {:>6}  clear {:<11} {}",
            e.name(),
            e.table,
            e.endpoint,
            e.batch_size,
            e.large_threshold,
            e.clear_mode,
            if e.critical { "critical" } else { "" }
        );
    }
    Ok(())
}

/// Install the global subscriber: stderr always, plus a per-run file when a
/// log directory is configured.
fn setup_logging(
    verbosity: &str,
    format: &str,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>, SyncError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let stderr_layer = if format == "json" {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_name = format!("sync_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(level)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SyncError::Config(format!("failed to initialise logging: {}", e)))?;

    if format != "json" && format != "text" {
        warn!("Unknown log format '{}', using text", format);
    }

    Ok(guard)
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Shutting down gracefully...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
