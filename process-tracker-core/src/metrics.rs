//! Host-wide metrics used to normalize per-process values.

use crate::process::fs::FileSystem;
use std::sync::OnceLock;

/// Core count and total memory, looked up once and cached for the process lifetime.
///
/// The underlying topology is assumed stable for the life of the supervisor, so
/// both lookups are computed lazily on first use and never refreshed.
pub struct SystemMetrics<F: FileSystem> {
    fs: F,
    proc_path: String,
    core_count: OnceLock<u32>,
    total_memory_mb: OnceLock<f64>,
}

impl<F: FileSystem> SystemMetrics<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            core_count: OnceLock::new(),
            total_memory_mb: OnceLock::new(),
        }
    }

    /// Number of logical CPU cores, from `/proc/cpuinfo`. Falls back to 1 if
    /// the file is unreadable or carries no `processor` lines.
    pub fn core_count(&self) -> u32 {
        *self.core_count.get_or_init(|| {
            let path = format!("{}/cpuinfo", self.proc_path);
            let content = match self.fs.read_to_string(std::path::Path::new(&path)) {
                Ok(c) => c,
                Err(_) => return 1,
            };
            let count = content
                .lines()
                .filter(|l| l.starts_with("processor"))
                .count() as u32;
            count.max(1)
        })
    }

    /// Total installed RAM in megabytes, from `/proc/meminfo`'s `MemTotal` line.
    pub fn total_memory_mb(&self) -> f64 {
        *self.total_memory_mb.get_or_init(|| {
            let path = format!("{}/meminfo", self.proc_path);
            let content = match self.fs.read_to_string(std::path::Path::new(&path)) {
                Ok(c) => c,
                Err(_) => return 0.0,
            };
            for line in content.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    let kb: f64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0.0);
                    return kb / 1024.0;
                }
            }
            0.0
        })
    }

    /// `mb` expressed as a percentage of total memory; 0 if total memory is unknown.
    pub fn memory_percent(&self, mb: f64) -> f64 {
        let total = self.total_memory_mb();
        if total > 0.0 { mb / total * 100.0 } else { 0.0 }
    }

    /// `raw` (0..core_count*100) scaled to \[0, 100\]; 0 if core count is unknown.
    pub fn cpu_normalized(&self, raw: f64) -> f64 {
        let cores = self.core_count();
        if cores > 0 {
            (raw / cores as f64).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fs::MockFs;

    #[test]
    fn core_count_from_cpuinfo() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/cpuinfo",
            "processor\t: 0\nprocessor\t: 1\nprocessor\t: 2\nprocessor\t: 3\n",
        );
        let metrics = SystemMetrics::new(fs, "/proc");
        assert_eq!(metrics.core_count(), 4);
    }

    #[test]
    fn core_count_defaults_to_one() {
        let fs = MockFs::new();
        let metrics = SystemMetrics::new(fs, "/proc");
        assert_eq!(metrics.core_count(), 1);
    }

    #[test]
    fn total_memory_from_meminfo() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/meminfo",
            "MemTotal:       16384000 kB\nMemFree:        1000000 kB\n",
        );
        let metrics = SystemMetrics::new(fs, "/proc");
        assert!((metrics.total_memory_mb() - 16000.0).abs() < 1.0);
    }

    #[test]
    fn memory_percent_zero_when_total_unknown() {
        let fs = MockFs::new();
        let metrics = SystemMetrics::new(fs, "/proc");
        assert_eq!(metrics.memory_percent(100.0), 0.0);
    }

    #[test]
    fn cpu_normalized_clamped() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", "processor\t: 0\n");
        let metrics = SystemMetrics::new(fs, "/proc");
        assert_eq!(metrics.cpu_normalized(250.0), 100.0);
    }
}
