//! YAML daemon configuration. This is the one place the `serde_yaml`-shaped
//! config file is parsed; `process-tracker-core` never sees a file path, only
//! the plain config structs its constructors take (spec §6's "config file
//! loading (YAML)" non-goal binds the core, not this daemon).

use process_tracker_core::alert::AlertRule;
use serde::Deserialize;
use std::path::PathBuf;

fn default_data_dir() -> PathBuf {
    dirs_home().join(".process-tracker")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn default_interval() -> u64 {
    5
}

fn default_proc_path() -> String {
    "/proc".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_compress_after_days() -> u64 {
    3
}

fn default_cleanup_after_days() -> u64 {
    30
}

fn default_max_files() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub batch_size: usize,
    pub max_file_size_mb: u64,
    pub compress_after_days: u64,
    pub cleanup_after_days: u64,
    pub max_files: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_file_size_mb: default_max_file_size_mb(),
            compress_after_days: default_compress_after_days(),
            cleanup_after_days: default_cleanup_after_days(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_proc_path")]
    pub proc_path: String,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            interval_seconds: default_interval(),
            proc_path: default_proc_path(),
            store: StoreSection::default(),
            alerts: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Loads from `path` if given, otherwise returns defaults. A present but
    /// malformed file is a startup validation error (spec §7: "Config
    /// validation error at startup: refuse to start; exit 1").
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        serde_yaml::from_str(&content).map_err(|e| format!("failed to parse config {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DaemonConfig::default();
        assert_eq!(config.interval_seconds, 5);
        assert_eq!(config.store.max_file_size_mb, 50);
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = "data_dir: /tmp/pt\ninterval_seconds: 10\n";
        let config: DaemonConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pt"));
        assert_eq!(config.interval_seconds, 10);
        assert_eq!(config.store.max_file_size_mb, 50);
    }

    #[test]
    fn parses_alert_rules() {
        let yaml = r#"
alerts:
  - name: high-cpu
    enabled: true
    metric: system_cpu_percent
    threshold: 80.0
    duration_seconds: 60
    aggregation: max
    channels: ["log"]
"#;
        let config: DaemonConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.alerts.len(), 1);
        assert_eq!(config.alerts[0].name, "high-cpu");
    }
}
