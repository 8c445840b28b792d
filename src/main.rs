//! line-oee - Production-line OEE engine
//!
//! Samples machine signals, classifies working / idle / changeover time,
//! accounts energy and air usage and closes a summary at every shift boundary.
//!
//! # Usage
//!
//! ```bash
//! # Run against a simulated line
//! cargo run --release -- --simulate
//!
//! # Run against feed documents maintained by external ingestors
//! ./line-oee --config /etc/line-oee/line_config.toml --data-dir /var/lib/line-oee
//!
//! # Print the last archived shift
//! ./line-oee show-summary
//! ```
//!
//! # Environment Variables
//!
//! - `LINE_OEE_CONFIG`: Path to the line configuration TOML
//! - `LINE_OEE_DATA_DIR`: Overrides `storage.data_dir`
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use line_oee::acquisition::{
    DocumentMeterFeed, DocumentTelemetryFeed, MeterFeed, SimulatedLine, TelemetryFeed,
};
use line_oee::config::{self, LineConfig};
use line_oee::pipeline::{
    ArchiveLoop, CostLoop, LiveLoop, PipelineContext, RolloverLoop, SamplingLoop,
};
use line_oee::storage::{ArchiveSink, JsonDocumentStore, SledArchive};
use line_oee::{OeeEngine, OeeSnapshot, ShiftSummary};

/// How long running tasks get to finish their last iteration on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "line-oee")]
#[command(about = "Production-line OEE engine with shift rollover")]
#[command(version)]
struct CliArgs {
    /// Path to the line configuration TOML (otherwise $LINE_OEE_CONFIG,
    /// ./line_config.toml, built-in defaults)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for the snapshot, summary, archive and feed documents
    #[arg(long, value_name = "PATH", env = "LINE_OEE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Drive the engine from a simulated line instead of the feed documents
    #[arg(long)]
    simulate: bool,

    /// Seed for the simulated line
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Delete the snapshot and summary documents before starting.
    /// The running shift starts from zero.
    #[arg(long)]
    reset_state: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Print the latest archived shift summary as JSON
    ShowSummary,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Sampling,
    CostAccounting,
    LiveEstimator,
    Archive,
    ShiftRollover,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Sampling => write!(f, "Sampling"),
            TaskName::CostAccounting => write!(f, "CostAccounting"),
            TaskName::LiveEstimator => write!(f, "LiveEstimator"),
            TaskName::Archive => write!(f, "Archive"),
            TaskName::ShiftRollover => write!(f, "ShiftRollover"),
        }
    }
}

// ============================================================================
// Startup Helpers
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(args: &CliArgs) -> Result<LineConfig> {
    let mut config = match &args.config {
        Some(path) => LineConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LineConfig::load(),
    };
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok(config)
}

/// Remove the snapshot and summary documents (and their backups).
fn reset_state(config: &LineConfig) -> Result<()> {
    warn!("⚠️  --reset-state: discarding persisted engine state");
    for path in [config.storage.snapshot_path(), config.storage.summary_path()] {
        JsonDocumentStore::new(&path)
            .remove()
            .with_context(|| format!("failed to remove {}", path.display()))?;
        info!(path = %path.display(), "Removed");
    }
    Ok(())
}

fn show_summary(config: &LineConfig) -> Result<()> {
    let archive = SledArchive::open(config.storage.archive_path())
        .context("failed to open shift archive")?;
    let summary = match archive.latest_shift_summary()? {
        Some(summary) => Some(summary),
        None => JsonDocumentStore::new(config.storage.summary_path()).load::<ShiftSummary>(),
    };
    match summary {
        Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
        None => info!("No shift has been closed yet"),
    }
    Ok(())
}

/// Rebuild the engine from the last snapshot document, or start fresh.
fn hydrate_engine(config: &LineConfig) -> OeeEngine {
    let now = chrono::Utc::now();
    let store = JsonDocumentStore::new(config.storage.snapshot_path());
    match store.load_with_source::<OeeSnapshot>() {
        Some((snapshot, source)) => {
            info!(?source, taken = %snapshot.timestamp, "📂 Resuming from persisted snapshot");
            OeeEngine::hydrate(config, &snapshot, now)
        }
        None => {
            info!("📂 No persisted snapshot, starting a fresh shift");
            OeeEngine::new(config, now)
        }
    }
}

// ============================================================================
// Task Spawning
// ============================================================================

fn spawn_sampling(
    task_set: &mut JoinSet<Result<TaskName>>,
    ctx: PipelineContext,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        SamplingLoop::new(ctx).run(cancel_token).await?;
        Ok(TaskName::Sampling)
    });
}

fn spawn_cost_accounting(
    task_set: &mut JoinSet<Result<TaskName>>,
    ctx: PipelineContext,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        CostLoop::new(ctx).run(cancel_token).await?;
        Ok(TaskName::CostAccounting)
    });
}

fn spawn_live_estimator(
    task_set: &mut JoinSet<Result<TaskName>>,
    ctx: PipelineContext,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        LiveLoop::new(ctx).run(cancel_token).await?;
        Ok(TaskName::LiveEstimator)
    });
}

fn spawn_archive(
    task_set: &mut JoinSet<Result<TaskName>>,
    ctx: PipelineContext,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        ArchiveLoop::new(ctx).run(cancel_token).await?;
        Ok(TaskName::Archive)
    });
}

fn spawn_shift_rollover(
    task_set: &mut JoinSet<Result<TaskName>>,
    rollover: RolloverLoop,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        rollover.run(cancel_token).await?;
        Ok(TaskName::ShiftRollover)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // let the loops write their last snapshot
    let drain = async {
        while let Some(result) = task_set.join_next().await {
            if let Ok(Ok(task_name)) = result {
                info!("🔒 Supervisor: Task {} stopped", task_name);
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("🔒 Supervisor: Tasks still running after {:?}, aborting", SHUTDOWN_GRACE);
        task_set.abort_all();
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let line_config = load_config(&args)?;

    if let Some(SubCommand::ShowSummary) = &args.command {
        return show_summary(&line_config);
    }

    if args.reset_state {
        reset_state(&line_config)?;
    }

    std::fs::create_dir_all(&line_config.storage.data_dir).with_context(|| {
        format!("failed to create data dir {}", line_config.storage.data_dir.display())
    })?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  line-oee - Production-line OEE engine");
    info!(
        "  Line: {} | Shifts: {} ({})",
        line_config.line.name,
        line_config.shift.boundaries.join(" / "),
        line_config.shift.timezone
    );
    info!("  Data: {}", line_config.storage.data_dir.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    config::init(line_config);
    let line_config = Arc::new(config::get().clone());

    let archive = Arc::new(
        SledArchive::open(line_config.storage.archive_path()).context("failed to open archive")?,
    );
    info!(samples = archive.sample_count(), "🗄️  Archive: {}", archive.backend_name());

    let engine = hydrate_engine(&line_config).into_shared();

    let (telemetry, meters): (Arc<dyn TelemetryFeed>, Arc<dyn MeterFeed>) = if args.simulate {
        info!("📥 Input: simulated line (seed {})", args.seed);
        let sim = Arc::new(SimulatedLine::new(
            line_config.signals.clone(),
            line_config.cost.clone(),
            args.seed,
            chrono::Utc::now(),
        ));
        let telemetry: Arc<dyn TelemetryFeed> = sim.clone();
        let meters: Arc<dyn MeterFeed> = sim;
        (telemetry, meters)
    } else {
        let telemetry_path = line_config.storage.telemetry_path();
        let meters_path = line_config.storage.meters_path();
        info!(
            "📥 Input: feed documents {} / {}",
            telemetry_path.display(),
            meters_path.display()
        );
        let telemetry: Arc<dyn TelemetryFeed> = Arc::new(DocumentTelemetryFeed::new(telemetry_path));
        let meters: Arc<dyn MeterFeed> = Arc::new(DocumentMeterFeed::new(meters_path));
        (telemetry, meters)
    };

    let ctx = PipelineContext::new(
        Arc::clone(&line_config),
        engine,
        telemetry,
        meters,
        archive.clone(),
    );
    let rollover = RolloverLoop::new(ctx.clone()).context("invalid shift calendar")?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_sampling(&mut task_set, ctx.clone(), cancel_token.clone());
    spawn_cost_accounting(&mut task_set, ctx.clone(), cancel_token.clone());
    spawn_live_estimator(&mut task_set, ctx.clone(), cancel_token.clone());
    spawn_archive(&mut task_set, ctx, cancel_token.clone());
    spawn_shift_rollover(&mut task_set, rollover, cancel_token.clone());

    let outcome = run_supervisor(&mut task_set, cancel_token).await;

    if let Err(e) = archive.flush() {
        warn!(error = %e, "Archive flush on shutdown failed");
    }

    outcome?;
    info!("✓ line-oee shutdown complete");
    Ok(())
}
