//! Process enumeration: the `ProcessSource` contract and its `/proc`-backed implementation.

pub mod fs;
pub mod parser;

use fs::FileSystem;
use parser::{parse_boot_time, parse_proc_io, parse_proc_stat};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

const CLK_TCK: u64 = 100;

/// One process's raw, unfiltered observation for the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub command: String,
    pub working_dir: String,
    /// Seconds since epoch.
    pub create_time: i64,
    /// 0..core_count*100.
    pub cpu_percent_raw: f64,
    pub rss_bytes: u64,
    pub threads: u32,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    /// Best-effort; 0 if not estimable.
    pub net_sent_kb: f64,
    pub net_recv_kb: f64,
    /// Whether disk or net counters advanced since the previous tick this
    /// pid was observed. False on a pid's first observation.
    pub io_delta_positive: bool,
}

/// Error collecting a single process. Callers are expected to elide these,
/// never failing the whole snapshot over one process.
#[derive(Debug)]
pub enum CollectError {
    ProcessGone(u32),
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Error surfaced by `ProcessSource::snapshot` itself (as opposed to a single
/// process within it, which is elided per-process).
#[derive(Debug, thiserror::Error)]
pub enum ProcessSourceError {
    #[error("failed to enumerate processes: {0}")]
    Enumerate(#[source] std::io::Error),
}

/// Contract: enumerate every live process once per tick.
pub trait ProcessSource {
    fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, ProcessSourceError>;
}

/// `/proc`-backed `ProcessSource`. Generic over `FileSystem` so it can run
/// against a `MockFs` in tests.
pub struct ProcfsSource<F: FileSystem> {
    fs: F,
    proc_path: String,
    page_size: u64,
    boot_time: u64,
    prev_ticks: HashMap<u32, (u64, Instant)>,
    prev_io: HashMap<u32, (u64, u64, f64, f64)>,
}

impl<F: FileSystem> ProcfsSource<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        let proc_path = proc_path.into();
        let mut source = Self {
            fs,
            proc_path,
            page_size: 4096,
            boot_time: 0,
            prev_ticks: HashMap::new(),
            prev_io: HashMap::new(),
        };
        source.refresh_boot_time();
        source
    }

    /// Refreshes the cached kernel boot time from `/proc/stat`. Called once
    /// at construction and safe to call again if it ever fails initially.
    pub fn refresh_boot_time(&mut self) {
        let path = format!("{}/stat", self.proc_path);
        if let Ok(content) = self.fs.read_to_string(Path::new(&path))
            && let Some(bt) = parse_boot_time(&content)
        {
            self.boot_time = bt;
        }
    }

    fn collect_process(&mut self, pid: u32, now: Instant) -> Result<ProcessInfo, CollectError> {
        let proc_dir = format!("{}/{}", self.proc_path, pid);

        let stat_path = format!("{}/stat", proc_dir);
        let stat_content = self
            .fs
            .read_to_string(Path::new(&stat_path))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        let stat = parse_proc_stat(&stat_content).map_err(|e| CollectError::Parse(e.message))?;

        let io_path = format!("{}/io", proc_dir);
        let io = self
            .fs
            .read_to_string(Path::new(&io_path))
            .ok()
            .and_then(|content| parse_proc_io(&content).ok())
            .unwrap_or_default();

        let cmdline_path = format!("{}/cmdline", proc_dir);
        let command = self
            .fs
            .read_to_string(Path::new(&cmdline_path))
            .unwrap_or_default()
            .replace('\0', " ")
            .trim()
            .to_string();

        let comm_path = format!("{}/comm", proc_dir);
        let name = self
            .fs
            .read_to_string(Path::new(&comm_path))
            .unwrap_or_else(|_| stat.comm.clone())
            .trim()
            .to_string();

        let cwd_path = format!("{}/cwd", proc_dir);
        let working_dir = self
            .fs
            .read_link(Path::new(&cwd_path))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let create_time = if self.boot_time == 0 {
            0
        } else {
            (self.boot_time + stat.starttime / CLK_TCK) as i64
        };

        let total_ticks = stat.utime + stat.stime;
        let cpu_percent_raw = match self.prev_ticks.get(&pid) {
            Some((prev_ticks, prev_instant)) => {
                let elapsed = now.saturating_duration_since(*prev_instant).as_secs_f64();
                if elapsed > 0.0 && total_ticks >= *prev_ticks {
                    let delta_ticks = (total_ticks - prev_ticks) as f64;
                    (delta_ticks / CLK_TCK as f64) / elapsed * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.prev_ticks.insert(pid, (total_ticks, now));

        let net_sent_kb = 0.0;
        let net_recv_kb = 0.0;
        let io_delta_positive = match self.prev_io.get(&pid) {
            Some((prev_read, prev_write, prev_sent, prev_recv)) => {
                io.read_bytes.saturating_sub(*prev_read) > 0
                    || io.write_bytes.saturating_sub(*prev_write) > 0
                    || net_sent_kb > *prev_sent
                    || net_recv_kb > *prev_recv
            }
            None => false,
        };
        self.prev_io.insert(pid, (io.read_bytes, io.write_bytes, net_sent_kb, net_recv_kb));

        Ok(ProcessInfo {
            pid: stat.pid,
            ppid: stat.ppid,
            name,
            command,
            working_dir,
            create_time,
            cpu_percent_raw,
            rss_bytes: (stat.rss_pages.max(0) as u64) * self.page_size,
            threads: stat.num_threads,
            disk_read_bytes: io.read_bytes,
            disk_write_bytes: io.write_bytes,
            net_sent_kb,
            net_recv_kb,
            io_delta_positive,
        })
    }
}

impl<F: FileSystem> ProcessSource for ProcfsSource<F> {
    fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, ProcessSourceError> {
        let proc_path = self.proc_path.clone();
        let entries = self
            .fs
            .read_dir(Path::new(&proc_path))
            .map_err(ProcessSourceError::Enumerate)?;

        let now = Instant::now();
        let mut processes = Vec::new();
        let mut live_pids = std::collections::HashSet::new();

        for entry in entries {
            let Some(pid) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            live_pids.insert(pid);
            match self.collect_process(pid, now) {
                Ok(info) => processes.push(info),
                Err(CollectError::ProcessGone(_)) => continue,
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to collect process, skipping");
                }
            }
        }

        self.prev_ticks.retain(|pid, _| live_pids.contains(pid));
        self.prev_io.retain(|pid, _| live_pids.contains(pid));
        Ok(processes)
    }
}
