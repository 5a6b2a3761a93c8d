//! process-tracker - CLI frontend for the process telemetry supervisor.
//!
//! Thin wrapper: `start`/`web` spawn the daemon/dashboard binaries and manage
//! the PID file, `stats`/`run`/`task` call `process-tracker-core` directly for
//! one-shot reads and task-table mutations.

mod pid;

use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand};
use process_tracker_core::query::{QueryApi, SortBy};
use process_tracker_core::store::{RecordStore, StoreConfig};
use process_tracker_core::task::{TaskStatus, TaskTracker};
use tracing::{error, info};

const DEFAULT_STATS_TOP_N: usize = 10;
const DEFAULT_STATS_BUCKETS: usize = 24;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Parser)]
#[command(name = "process-tracker", about = "Process telemetry supervisor CLI", version)]
struct Cli {
    /// Data directory shared with process-trackerd.
    #[arg(long, global = true, default_value_os_t = default_data_dir())]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the telemetry daemon (process-trackerd) in the background.
    Start {
        /// Sampling interval in seconds.
        #[arg(short, long, default_value_t = 5)]
        interval: u64,
        /// Also start the dashboard server.
        #[arg(short, long)]
        web: bool,
        /// Dashboard port, used only with --web.
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Stop the running daemon.
    Stop,
    /// Report whether the daemon is running.
    Status,
    /// Print aggregate stats for a window.
    Stats {
        /// Last 24 hours (default).
        #[arg(short = 'd', long)]
        day: bool,
        /// Last 7 days.
        #[arg(short = 'w', long)]
        week: bool,
        /// Last 30 days.
        #[arg(short = 'm', long)]
        month: bool,
    },
    /// Run the dashboard server in the foreground.
    Web {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Create and start a task for the given command.
    Run {
        /// Shell command to run.
        command: String,
        /// Optional task name; defaults to the command text.
        name: Option<String>,
    },
    /// Inspect or manage the task table.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Print the CLI version.
    Version,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List all tasks.
    List,
    /// List only running tasks.
    Running,
    /// Stop a running task.
    Stop { id: u64 },
    /// Delete a non-running task.
    Delete { id: u64 },
    /// Show one task's detail.
    Show { id: u64 },
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".process-tracker")
}

/// Finds a sibling binary next to this one, falling back to the bare name
/// (resolved via PATH) if this executable's directory can't be determined.
fn sibling_binary(name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join(name)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(name))
}

fn cmd_start(data_dir: &std::path::Path, interval: u64, web: bool, port: u16) {
    if let Some(existing) = pid::read_pid(data_dir)
        && pid::is_alive(existing)
    {
        error!("process-trackerd already running (pid {existing})");
        std::process::exit(2);
    }

    let daemon = sibling_binary("process-trackerd");
    match Command::new(&daemon)
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--interval")
        .arg(interval.to_string())
        .spawn()
    {
        Ok(child) => info!(pid = child.id(), "process-trackerd started"),
        Err(e) => {
            error!("failed to start process-trackerd ({}): {}", daemon.display(), e);
            std::process::exit(1);
        }
    }

    if web {
        let dashboard = sibling_binary("process-tracker-web");
        let listen = format!("127.0.0.1:{port}");
        match Command::new(&dashboard)
            .arg("--data-dir")
            .arg(data_dir)
            .arg("--listen")
            .arg(&listen)
            .spawn()
        {
            Ok(child) => info!(pid = child.id(), %listen, "process-tracker-web started"),
            Err(e) => error!("failed to start process-tracker-web ({}): {}", dashboard.display(), e),
        }
    }
}

fn cmd_stop(data_dir: &std::path::Path) {
    match pid::read_pid(data_dir) {
        Some(pid) if pid::is_alive(pid) => match pid::send_term(pid) {
            Ok(()) => println!("sent shutdown signal to process-trackerd (pid {pid})"),
            Err(e) => {
                error!("failed to signal pid {pid}: {e}");
                std::process::exit(1);
            }
        },
        _ => {
            println!("process-trackerd is not running");
            std::process::exit(1);
        }
    }
}

fn cmd_status(data_dir: &std::path::Path) {
    match pid::read_pid(data_dir) {
        Some(pid) if pid::is_alive(pid) => println!("process-trackerd is running (pid {pid})"),
        _ => {
            println!("process-trackerd is not running");
            std::process::exit(1);
        }
    }
}

fn cmd_stats(data_dir: &std::path::Path, day: bool, week: bool, month: bool) {
    let window_seconds = if month {
        30 * SECONDS_PER_DAY
    } else if week {
        7 * SECONDS_PER_DAY
    } else {
        let _ = day;
        SECONDS_PER_DAY
    };

    let store = match RecordStore::new(StoreConfig::new(data_dir.join("process-tracker.log"))) {
        Ok(store) => store,
        Err(e) => {
            error!("failed to open record store: {e}");
            std::process::exit(1);
        }
    };
    let api = QueryApi::new(&store);
    let stats = api.stats(window_seconds, DEFAULT_STATS_TOP_N, DEFAULT_STATS_BUCKETS);

    println!(
        "window: {}s .. {}s ({} processes, {} active)",
        stats.window_start, stats.window_end, stats.process_count, stats.active_count
    );
    println!("cpu: avg {:.1}%  max {:.1}%", stats.cpu_avg, stats.cpu_max);
    println!(
        "memory: total {:.1} MB ({:.1}%)  max {:.1} MB ({:.1}%)",
        stats.memory_total_mb, stats.memory_total_percent, stats.memory_max_mb, stats.memory_max_percent
    );
    println!("top processes:");
    for proc in &stats.top_processes {
        println!("  {:>7}  {:<20}  cpu {:>5.1}%  mem {:>7.1} MB", proc.pid, proc.name, proc.cpu_percent_normalized, proc.memory_mb);
    }
}

fn cmd_web(data_dir: &std::path::Path, port: u16, host: &str) {
    let dashboard = sibling_binary("process-tracker-web");
    let listen = format!("{host}:{port}");
    let status = Command::new(&dashboard)
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--listen")
        .arg(&listen)
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => {
            error!("failed to run process-tracker-web ({}): {}", dashboard.display(), e);
            std::process::exit(1);
        }
    }
}

fn cmd_run(data_dir: &std::path::Path, command: String, name: Option<String>) {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        error!("failed to create data directory {}: {e}", data_dir.display());
        std::process::exit(1);
    }
    let tracker = match TaskTracker::new(data_dir.join("tasks.json")) {
        Ok(tracker) => tracker,
        Err(e) => {
            error!("failed to open task store: {e}");
            std::process::exit(1);
        }
    };
    let name = name.unwrap_or_else(|| command.clone());
    let task = match tracker.create_task(name, command, 0) {
        Ok(task) => task,
        Err(e) => {
            error!("failed to create task: {e}");
            std::process::exit(1);
        }
    };
    match tracker.start_task(task.id) {
        Ok(task) => println!("started task {} (pid {:?})", task.id, task.root_pid),
        Err(e) => {
            error!("failed to start task {}: {e}", task.id);
            std::process::exit(1);
        }
    }
}

fn print_task_row(task: &process_tracker_core::task::Task) {
    println!(
        "{:>4}  {:<10}  {:<20}  {:<30}",
        task.id,
        format!("{:?}", task.status),
        task.name,
        task.command
    );
}

fn cmd_task(data_dir: &std::path::Path, action: TaskAction) {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        error!("failed to create data directory {}: {e}", data_dir.display());
        std::process::exit(1);
    }
    let tracker = match TaskTracker::new(data_dir.join("tasks.json")) {
        Ok(tracker) => tracker,
        Err(e) => {
            error!("failed to open task store: {e}");
            std::process::exit(1);
        }
    };

    match action {
        TaskAction::List => {
            for task in tracker.list_tasks(None) {
                print_task_row(&task);
            }
        }
        TaskAction::Running => {
            for task in tracker.list_tasks(Some(TaskStatus::Running)) {
                print_task_row(&task);
            }
        }
        TaskAction::Stop { id } => match tracker.stop_task(id) {
            Ok(task) => println!("stopped task {}", task.id),
            Err(e) => {
                error!("failed to stop task {id}: {e}");
                std::process::exit(1);
            }
        },
        TaskAction::Delete { id } => match tracker.delete_task(id) {
            Ok(()) => println!("deleted task {id}"),
            Err(e) => {
                error!("failed to delete task {id}: {e}");
                std::process::exit(1);
            }
        },
        TaskAction::Show { id } => match tracker.get_task(id) {
            Some(task) => println!("{:#?}", task),
            None => {
                error!("task {id} not found");
                std::process::exit(1);
            }
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "process_tracker=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { interval, web, port } => cmd_start(&cli.data_dir, interval, web, port),
        Commands::Stop => cmd_stop(&cli.data_dir),
        Commands::Status => cmd_status(&cli.data_dir),
        Commands::Stats { day, week, month } => cmd_stats(&cli.data_dir, day, week, month),
        Commands::Web { port, host } => cmd_web(&cli.data_dir, port, &host),
        Commands::Run { command, name } => cmd_run(&cli.data_dir, command, name),
        Commands::Task { action } => cmd_task(&cli.data_dir, action),
        Commands::Version => println!("process-tracker {}", env!("CARGO_PKG_VERSION")),
    }
}
