//! The `Record` type: one observation of one process at one instant, plus the
//! filter/normalize/enrich pipeline that turns a raw `ProcessInfo` into one.

use crate::categorize::{categorize_with_cwd, KERNEL_EXACT, KERNEL_PREFIXES};
use crate::metrics::SystemMetrics;
use crate::process::ProcessInfo;
use crate::process::fs::FileSystem;
use serde::{Deserialize, Serialize};

/// One observation of one process at one instant. Field order here is
/// unrelated to the on-disk CSV column order (see `store::format`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Seconds since epoch.
    pub timestamp: i64,
    pub pid: u32,
    pub ppid: u32,
    /// Seconds since epoch.
    pub create_time: i64,
    pub name: String,
    pub cpu_percent_raw: f64,
    pub cpu_percent_normalized: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub threads: u32,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    pub net_sent_kb: f64,
    pub net_recv_kb: f64,
    pub is_active: bool,
    pub command: String,
    pub working_dir: String,
    pub category: String,
}

/// Drops processes the sampler should never surface: empty/whitespace names,
/// non-positive pids, and known kernel/system-service names.
pub fn should_filter(name: &str, pid: u32) -> bool {
    if pid == 0 || name.trim().is_empty() {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    KERNEL_PREFIXES.iter().any(|p| lower.starts_with(p)) || KERNEL_EXACT.contains(&lower.as_str())
}

/// Strips common binary suffixes and surrounding whitespace.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_suffix(".exe").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(".so").unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Turns one raw `ProcessInfo` into a `Record`, or `None` if the filter drops it.
pub fn enrich<F: FileSystem>(
    info: &ProcessInfo,
    metrics: &SystemMetrics<F>,
    timestamp: i64,
) -> Option<Record> {
    if should_filter(&info.name, info.pid) {
        return None;
    }

    let name = normalize_name(&info.name);
    let memory_mb = info.rss_bytes as f64 / (1024.0 * 1024.0);
    let memory_percent = metrics.memory_percent(memory_mb);
    let cpu_percent_normalized = metrics.cpu_normalized(info.cpu_percent_raw);
    let disk_read_mb = info.disk_read_bytes as f64 / (1024.0 * 1024.0);
    let disk_write_mb = info.disk_write_bytes as f64 / (1024.0 * 1024.0);
    let is_active = info.cpu_percent_raw > 0.1 || memory_mb > 1.0 || info.io_delta_positive;
    let category =
        categorize_with_cwd(&name, &info.command, &info.working_dir).to_string();

    Some(Record {
        timestamp,
        pid: info.pid,
        ppid: info.ppid,
        create_time: info.create_time,
        name,
        cpu_percent_raw: info.cpu_percent_raw,
        cpu_percent_normalized,
        memory_mb,
        memory_percent,
        threads: info.threads,
        disk_read_mb,
        disk_write_mb,
        net_sent_kb: info.net_sent_kb,
        net_recv_kb: info.net_recv_kb,
        is_active,
        command: info.command.clone(),
        working_dir: info.working_dir.clone(),
        category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fs::MockFs;

    fn sample_metrics() -> SystemMetrics<MockFs> {
        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", "processor\t: 0\nprocessor\t: 1\n");
        fs.add_file("/proc/meminfo", "MemTotal: 16384000 kB\n");
        SystemMetrics::new(fs, "/proc")
    }

    fn sample_info() -> ProcessInfo {
        ProcessInfo {
            pid: 1234,
            ppid: 1,
            name: "myapp.exe".to_string(),
            command: "myapp --flag".to_string(),
            working_dir: "/srv".to_string(),
            create_time: 1700000000,
            cpu_percent_raw: 50.0,
            rss_bytes: 100 * 1024 * 1024,
            threads: 4,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            net_sent_kb: 0.0,
            net_recv_kb: 0.0,
            io_delta_positive: false,
        }
    }

    #[test]
    fn filters_zero_pid() {
        assert!(should_filter("anything", 0));
    }

    #[test]
    fn filters_empty_name() {
        assert!(should_filter("   ", 123));
    }

    #[test]
    fn filters_kernel_prefix() {
        assert!(should_filter("kworker/0:1", 5));
    }

    #[test]
    fn filters_exact_system_name() {
        assert!(should_filter("systemd", 1));
    }

    #[test]
    fn does_not_filter_regular_process() {
        assert!(!should_filter("myapp", 1234));
    }

    #[test]
    fn normalizes_exe_suffix() {
        assert_eq!(normalize_name("  myapp.exe  "), "myapp");
    }

    #[test]
    fn enrich_computes_all_fields() {
        let metrics = sample_metrics();
        let record = enrich(&sample_info(), &metrics, 1700000100).unwrap();
        assert_eq!(record.name, "myapp");
        assert_eq!(record.pid, 1234);
        assert!((record.cpu_percent_normalized - 25.0).abs() < 1e-6);
        assert!((record.memory_mb - 100.0).abs() < 1e-6);
        assert!(record.memory_percent > 0.0);
        assert!(record.is_active);
        assert_eq!(record.category, "other");
    }

    #[test]
    fn enrich_filters_kernel_process() {
        let metrics = sample_metrics();
        let mut info = sample_info();
        info.name = "kworker/1:2".to_string();
        assert!(enrich(&info, &metrics, 0).is_none());
    }

    #[test]
    fn is_active_false_for_idle_process() {
        let metrics = sample_metrics();
        let mut info = sample_info();
        info.cpu_percent_raw = 0.0;
        info.rss_bytes = 0;
        let record = enrich(&info, &metrics, 0).unwrap();
        assert!(!record.is_active);
    }

    #[test]
    fn is_active_true_for_io_delta_with_no_cpu_or_memory() {
        let metrics = sample_metrics();
        let mut info = sample_info();
        info.cpu_percent_raw = 0.0;
        info.rss_bytes = 0;
        info.io_delta_positive = true;
        let record = enrich(&info, &metrics, 0).unwrap();
        assert!(record.is_active);
    }

    #[test]
    fn zero_total_memory_yields_zero_percent() {
        let fs = MockFs::new();
        let metrics = SystemMetrics::new(fs, "/proc");
        let record = enrich(&sample_info(), &metrics, 0).unwrap();
        assert_eq!(record.memory_percent, 0.0);
    }
}
