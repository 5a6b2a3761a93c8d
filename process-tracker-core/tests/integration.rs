//! End-to-end scenarios that need a real temp directory, spanning multiple
//! modules at once (spec §8's "concrete end-to-end scenarios"). Per-module
//! unit tests already cover most of these at small scale; these exercise the
//! same properties at the scale spec §8 actually specifies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use process_tracker_core::alert::{AlertEngine, AlertRule, Aggregation, Metric, Notifier};
use process_tracker_core::record::Record;
use process_tracker_core::store::{RecordStore, StoreConfig};
use process_tracker_core::task::{ProcessLauncher, TaskTracker};
use tempfile::tempdir;

fn sample_record(ts: i64, pid: u32) -> Record {
    Record {
        timestamp: ts,
        pid,
        ppid: 1,
        create_time: 0,
        name: "worker".to_string(),
        cpu_percent_raw: 10.0,
        cpu_percent_normalized: 5.0,
        memory_mb: 50.0,
        memory_percent: 1.0,
        threads: 1,
        disk_read_mb: 0.0,
        disk_write_mb: 0.0,
        net_sent_kb: 0.0,
        net_recv_kb: 0.0,
        is_active: true,
        command: "worker".to_string(),
        working_dir: "/".to_string(),
        category: "other".to_string(),
    }
}

/// Scenario 1: configure `max_file_size_mb=1`, inject 50,000 records with
/// distinct timestamps. Expect at least two segment files, `read_window`
/// returning all 50,000 in timestamp order, and an active file at or under
/// the 1 MB bound.
#[test]
fn rotation_at_scale_preserves_every_record_in_order() {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("process-tracker.log"));
    config.batch_size = 500;
    config.max_file_size_mb = 1;
    let store = RecordStore::new(config).unwrap();

    for i in 0..50_000u32 {
        store.append(sample_record(1_700_000_000 + i as i64, i));
    }
    store.flush();

    let segment_count = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            let name = e.as_ref().unwrap().file_name();
            let name = name.to_string_lossy();
            name.starts_with("process-tracker.log.")
        })
        .count();
    assert!(segment_count >= 2, "expected at least 2 rotated segments, got {segment_count}");

    let active_size = std::fs::metadata(dir.path().join("process-tracker.log")).map(|m| m.len()).unwrap_or(0);
    assert!(active_size <= 1024 * 1024, "active file should be at or under the 1 MB bound, was {active_size} bytes");

    let all = store.read_window(0);
    assert_eq!(all.len(), 50_000);
    let timestamps: Vec<i64> = all.iter().map(|r| r.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted, "read_window must return non-decreasing timestamps");
}

struct CountingNotifier {
    triggered: Arc<AtomicUsize>,
    resolved: Arc<AtomicUsize>,
}

impl Notifier for CountingNotifier {
    fn send(&self, title: &str, _body: &str) -> Result<(), String> {
        if title.starts_with("[firing]") {
            self.triggered.fetch_add(1, Ordering::SeqCst);
        } else {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Scenario 2: a `system_cpu_percent` rule with `threshold=50`,
/// `duration=10s`. 10 ticks over threshold (firing begins at tick 10), 5 more
/// over threshold (suppressed), then 10 under threshold (recovery). Expect
/// exactly one `alert_triggered` and one `alert_resolved`.
#[test]
fn alert_fires_once_then_recovers_once_across_a_tick_sequence() {
    let triggered = Arc::new(AtomicUsize::new(0));
    let resolved = Arc::new(AtomicUsize::new(0));
    let mut notifiers: HashMap<String, Arc<dyn Notifier>> = HashMap::new();
    notifiers.insert(
        "mock".to_string(),
        Arc::new(CountingNotifier { triggered: triggered.clone(), resolved: resolved.clone() }),
    );

    let rule = AlertRule {
        name: "high-cpu".to_string(),
        enabled: true,
        metric: Metric::SystemCpuPercent,
        threshold: 50.0,
        duration_seconds: 10,
        aggregation: Aggregation::Max,
        process: String::new(),
        channels: vec!["mock".to_string()],
        suppress_duration_minutes: 30,
    };
    let engine = AlertEngine::new(vec![rule], notifiers);

    // 2 cores, raw cpu 120 -> normalized system_cpu_percent 60, over threshold.
    let over = vec![sample_record(0, 1).with_cpu(120.0)];
    let under = vec![sample_record(0, 1).with_cpu(0.0)];

    let mut now = 0i64;
    for _ in 0..10 {
        engine.evaluate_tick(&over, 2, 1000.0, now);
        now += 1;
    }
    assert_eq!(triggered.load(Ordering::SeqCst), 1, "should fire exactly on the tick duration is first reached");

    for _ in 0..5 {
        engine.evaluate_tick(&over, 2, 1000.0, now);
        now += 1;
    }
    assert_eq!(triggered.load(Ordering::SeqCst), 1, "still within the suppression window");

    for _ in 0..10 {
        engine.evaluate_tick(&under, 2, 1000.0, now);
        now += 1;
    }
    assert_eq!(triggered.load(Ordering::SeqCst), 1);
    assert_eq!(resolved.load(Ordering::SeqCst), 1);
}

trait WithCpu {
    fn with_cpu(self, cpu: f64) -> Self;
}

impl WithCpu for Record {
    fn with_cpu(mut self, cpu: f64) -> Self {
        self.cpu_percent_raw = cpu;
        self.cpu_percent_normalized = cpu / 2.0;
        self
    }
}

struct StubLauncher {
    pid: u32,
}

impl ProcessLauncher for StubLauncher {
    fn spawn(&self, _command: &str) -> std::io::Result<u32> {
        Ok(self.pid)
    }
    fn signal_group(&self, _pid: u32, _force: bool) -> std::io::Result<()> {
        Ok(())
    }
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
    fn try_wait(&self, _pid: u32) -> std::io::Result<Option<i32>> {
        Ok(Some(0))
    }
}

/// Scenario 3: a task tree with a root plus three children. Over 20 ticks at
/// a constant per-process load, the EWMA-smoothed `total_cpu`/`total_memory`
/// converge to the instantaneous sum within 10% well before the 15th tick.
#[test]
fn task_ewma_converges_to_descendant_sum_within_15_ticks() {
    let dir = tempdir().unwrap();
    let tracker = TaskTracker::with_launcher(dir.path().join("tasks.json"), StubLauncher { pid: 500 }).unwrap();
    let task = tracker.create_task("build", "make -j3", 0).unwrap();
    let started = tracker.start_task(task.id).unwrap();
    let root_pid = started.root_pid.unwrap();

    let per_process_cpu = 15.0;
    let per_process_mem = 20.0;
    let expected_cpu_sum = per_process_cpu * 4.0;
    let expected_mem_sum = per_process_mem * 4.0;

    for tick in 0..20 {
        let records = vec![
            sample_record(1000 + tick, root_pid).with_cpu(per_process_cpu * 2.0),
            sample_record(1000 + tick, root_pid + 1).with_cpu(per_process_cpu * 2.0),
            sample_record(1000 + tick, root_pid + 2).with_cpu(per_process_cpu * 2.0),
            sample_record(1000 + tick, root_pid + 3).with_cpu(per_process_cpu * 2.0),
        ]
        .into_iter()
        .map(|mut r| {
            r.ppid = if r.pid == root_pid { 1 } else { root_pid };
            r.memory_mb = per_process_mem;
            r
        })
        .collect::<Vec<_>>();

        tracker.tick(&records);

        if tick == 14 {
            let snapshot = tracker.get_task(task.id).unwrap();
            assert!(
                (snapshot.total_cpu - expected_cpu_sum).abs() / expected_cpu_sum < 0.10,
                "cpu EWMA should be within 10% of {expected_cpu_sum} by tick 15, was {}",
                snapshot.total_cpu
            );
            assert!(
                (snapshot.total_memory - expected_mem_sum).abs() / expected_mem_sum < 0.10,
                "memory EWMA should be within 10% of {expected_mem_sum} by tick 15, was {}",
                snapshot.total_memory
            );
        }
    }

    let final_task = tracker.get_task(task.id).unwrap();
    assert_eq!(final_task.process_count, 4);
}
