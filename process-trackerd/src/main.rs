//! process-trackerd - process telemetry supervisor daemon.
//!
//! Samples `/proc` on a fixed interval, enriches and stores records, rolls
//! task lifecycles forward, and evaluates alert rules, all from a single
//! sampler thread (spec: one writer, many readers).

mod config;
mod notify;
mod pidfile;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use process_tracker_core::alert::{AlertEngine, Notifier};
use process_tracker_core::metrics::SystemMetrics;
use process_tracker_core::process::ProcfsSource;
use process_tracker_core::process::fs::RealFs;
use process_tracker_core::sampler::Sampler;
use process_tracker_core::store::{RecordStore, StoreConfig};
use process_tracker_core::task::TaskTracker;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::DaemonConfig;
use notify::LogNotifier;
use pidfile::{AcquireError, PidFile};

/// Process telemetry supervisor daemon.
#[derive(Parser)]
#[command(name = "process-trackerd", about = "Process telemetry supervisor daemon", version)]
struct Args {
    /// Path to a YAML config file. Unset options fall back to built-in defaults.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Overrides the config's data directory.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Overrides the config's sampling interval, in seconds.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("process_trackerd={}", level).parse().unwrap())
        .add_directive(format!("process_tracker_core={}", level).parse().unwrap());

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn build_notifiers() -> HashMap<String, Arc<dyn Notifier>> {
    let mut notifiers: HashMap<String, Arc<dyn Notifier>> = HashMap::new();
    notifiers.insert("log".to_string(), Arc::new(LogNotifier));
    notifiers
}

/// Distinguishes "already running" (exit 2) from any other fatal init error
/// (exit 1), per spec §7's exit-code contract.
enum RunError {
    AlreadyRunning(String),
    Fatal(String),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::AlreadyRunning(msg) | RunError::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

fn run(args: Args) -> Result<(), RunError> {
    let mut config = DaemonConfig::load(args.config.as_deref()).map_err(RunError::Fatal)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(interval) = args.interval {
        config.interval_seconds = interval;
    }

    info!("process-trackerd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        data_dir = %config.data_dir.display(),
        interval_seconds = config.interval_seconds,
        proc_path = %config.proc_path,
        "configuration loaded"
    );

    let pid_file = PidFile::acquire(&config.data_dir).map_err(|e| match e {
        AcquireError::AlreadyRunning(msg) => RunError::AlreadyRunning(msg),
        AcquireError::Io(msg) => RunError::Fatal(msg),
    })?;

    let metrics = Arc::new(SystemMetrics::new(RealFs::new(), config.proc_path.clone()));
    info!(
        core_count = metrics.core_count(),
        total_memory_mb = metrics.total_memory_mb(),
        "system metrics sampled"
    );

    let mut store_config = StoreConfig::new(config.data_dir.join("process-tracker.log"));
    store_config.batch_size = config.store.batch_size;
    store_config.max_file_size_mb = config.store.max_file_size_mb;
    store_config.compress_after_days = config.store.compress_after_days;
    store_config.cleanup_after_days = config.store.cleanup_after_days;
    store_config.max_files = config.store.max_files;
    let store = Arc::new(
        RecordStore::new(store_config).map_err(|e| RunError::Fatal(format!("failed to open record store: {e}")))?,
    );

    let tasks = Arc::new(
        TaskTracker::new(config.data_dir.join("tasks.json"))
            .map_err(|e| RunError::Fatal(format!("failed to open task store: {e}")))?,
    );

    let alerts = Arc::new(AlertEngine::new(config.alerts.clone(), build_notifiers()));
    info!(rule_count = config.alerts.len(), "alert rules loaded");

    let source = ProcfsSource::new(RealFs::new(), config.proc_path.clone());
    let mut sampler = Sampler::new(source, metrics, store.clone(), tasks, alerts);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("failed to set Ctrl-C handler: {}", e);
    }

    let interval = Duration::from_secs(config.interval_seconds.max(1));
    info!("starting sampling loop");

    let mut last_maintain_tick: u64 = 0;
    while running.load(Ordering::SeqCst) {
        sampler.tick();

        // Run store maintenance (compression/retention) roughly once per
        // hour's worth of ticks rather than every tick.
        let ticks_per_hour = (3600 / config.interval_seconds.max(1)).max(1);
        if sampler.tick_count() - last_maintain_tick >= ticks_per_hour {
            last_maintain_tick = sampler.tick_count();
            store.maintain();
        }

        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("shutting down...");
    sampler.flush();
    pid_file.release();
    info!("shutdown complete");
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args) {
        Ok(()) => {}
        Err(RunError::AlreadyRunning(msg)) => {
            error!("{}", msg);
            std::process::exit(2);
        }
        Err(RunError::Fatal(msg)) => {
            error!("{}", msg);
            std::process::exit(1);
        }
    }
}
