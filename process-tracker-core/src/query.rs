//! Read-only surface over the `RecordStore`, consumed by the HTTP/JSON
//! dashboard: stats with a bucketed timeline, a live 5-minute snapshot, and a
//! pid-deduplicated process listing.

use crate::record::Record;
use crate::store::RecordStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const DEFAULT_TIMELINE_BUCKETS: usize = 60;
const STATS_CACHE_TTL: Duration = Duration::from_secs(5);
const LIVE_WINDOW_SECONDS: i64 = 5 * 60;
const LIVE_TOP_N: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Cpu,
    Memory,
    Name,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopProcess {
    pub pid: u32,
    pub name: String,
    pub cpu_percent_raw: f64,
    pub cpu_percent_normalized: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineBucket {
    pub start: i64,
    pub cpu_percent_normalized: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub window_start: i64,
    pub window_end: i64,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_total_mb: f64,
    pub memory_total_percent: f64,
    pub memory_max_mb: f64,
    pub memory_max_percent: f64,
    pub process_count: usize,
    pub active_count: usize,
    pub top_processes: Vec<TopProcess>,
    pub timeline: Vec<TimelineBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub pid: u32,
    pub name: String,
    pub cpu_percent_raw: f64,
    pub cpu_percent_normalized: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub status: &'static str,
    /// Seconds since the process's recorded `create_time`.
    pub uptime_seconds: i64,
    pub category: String,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    since: i64,
    top_n: usize,
    buckets: usize,
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The dashboard's only entry point into the store. `stats` responses are
/// cached for 5 seconds keyed by the resolved window, so a dashboard
/// polling every second doesn't force a full segment re-scan each time.
pub struct QueryApi<'a> {
    store: &'a RecordStore,
    cache: Mutex<HashMap<CacheKey, (Instant, StatsSnapshot)>>,
}

impl<'a> QueryApi<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Aggregate stats over `[now - window_seconds, now]`, with a timeline
    /// split into `bucket_count` equal buckets and the top-N processes by
    /// CPU then memory.
    pub fn stats(&self, window_seconds: i64, top_n: usize, bucket_count: usize) -> StatsSnapshot {
        let now = now_epoch();
        let since = now - window_seconds;
        let key = CacheKey { since: since / 5, top_n, buckets: bucket_count };

        {
            let cache = self.cache.lock().unwrap();
            if let Some((fetched_at, snapshot)) = cache.get(&key)
                && fetched_at.elapsed() < STATS_CACHE_TTL
            {
                return snapshot.clone();
            }
        }

        let records = self.store.read_window(since);
        let snapshot = build_stats(&records, since, now, top_n, bucket_count);

        let mut cache = self.cache.lock().unwrap();
        cache.insert(key, (Instant::now(), snapshot.clone()));
        snapshot
    }

    /// `stats` over the last 5 minutes, top 20 processes by CPU.
    pub fn live(&self) -> StatsSnapshot {
        self.stats(LIVE_WINDOW_SECONDS, LIVE_TOP_N, DEFAULT_TIMELINE_BUCKETS)
    }

    /// Deduplicates the window by pid (most recent record per pid), never by
    /// name: distinct processes that happen to share a name both appear.
    pub fn processes(&self, sort_by: SortBy, window_seconds: i64) -> Vec<ProcessSummary> {
        let now = now_epoch();
        let records = self.store.read_window(now - window_seconds);

        let mut latest: HashMap<u32, &Record> = HashMap::new();
        for record in &records {
            latest
                .entry(record.pid)
                .and_modify(|existing| {
                    if record.timestamp > existing.timestamp {
                        *existing = record;
                    }
                })
                .or_insert(record);
        }

        let mut summaries: Vec<ProcessSummary> = latest
            .into_values()
            .map(|r| ProcessSummary {
                pid: r.pid,
                name: r.name.clone(),
                cpu_percent_raw: r.cpu_percent_raw,
                cpu_percent_normalized: r.cpu_percent_normalized,
                memory_mb: r.memory_mb,
                memory_percent: r.memory_percent,
                status: if r.is_active { "active" } else { "idle" },
                uptime_seconds: (now - r.create_time).max(0),
                category: r.category.clone(),
                command: r.command.clone(),
            })
            .collect();

        match sort_by {
            SortBy::Cpu => summaries.sort_by(|a, b| {
                b.cpu_percent_normalized
                    .partial_cmp(&a.cpu_percent_normalized)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortBy::Memory => summaries.sort_by(|a, b| {
                b.memory_mb.partial_cmp(&a.memory_mb).unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortBy::Name => summaries.sort_by(|a, b| a.name.cmp(&b.name)),
        }
        summaries
    }
}

fn build_stats(
    records: &[Record],
    since: i64,
    now: i64,
    top_n: usize,
    bucket_count: usize,
) -> StatsSnapshot {
    let (cpu_avg, cpu_max) = if records.is_empty() {
        (0.0, 0.0)
    } else {
        let sum: f64 = records.iter().map(|r| r.cpu_percent_normalized).sum();
        let max = records.iter().map(|r| r.cpu_percent_normalized).fold(0.0, f64::max);
        (sum / records.len() as f64, max)
    };
    let memory_max_mb = records.iter().map(|r| r.memory_mb).fold(0.0, f64::max);
    let memory_max_percent = records.iter().map(|r| r.memory_percent).fold(0.0, f64::max);

    // Dedup by pid first: `process_count`/`active_count`/the memory totals
    // below must describe the set of currently-alive processes, not be
    // summed once per tick the window happens to span.
    let mut latest: HashMap<u32, &Record> = HashMap::new();
    for record in records {
        latest
            .entry(record.pid)
            .and_modify(|existing| {
                if record.timestamp > existing.timestamp {
                    *existing = record;
                }
            })
            .or_insert(record);
    }

    let process_count = latest.len();
    let active_count = latest.values().filter(|r| r.is_active).count();
    let memory_total_mb: f64 = latest.values().map(|r| r.memory_mb).sum();
    let memory_total_percent: f64 = latest.values().map(|r| r.memory_percent).sum();

    let mut top_processes: Vec<TopProcess> = latest
        .values()
        .map(|r| TopProcess {
            pid: r.pid,
            name: r.name.clone(),
            cpu_percent_raw: r.cpu_percent_raw,
            cpu_percent_normalized: r.cpu_percent_normalized,
            memory_mb: r.memory_mb,
            memory_percent: r.memory_percent,
        })
        .collect();
    top_processes.sort_by(|a, b| {
        b.cpu_percent_normalized
            .partial_cmp(&a.cpu_percent_normalized)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory_mb.partial_cmp(&a.memory_mb).unwrap_or(std::cmp::Ordering::Equal))
    });
    top_processes.truncate(top_n);

    StatsSnapshot {
        window_start: since,
        window_end: now,
        cpu_avg,
        cpu_max,
        memory_total_mb,
        memory_total_percent,
        memory_max_mb,
        memory_max_percent,
        process_count,
        active_count,
        top_processes,
        timeline: bucket_timeline(records, since, now, bucket_count),
    }
}

/// Splits `[start, end]` into `bucket_count` equal-width buckets and takes
/// the mean of (cpu_normalized, memory_mb, memory_percent) over each
/// bucket's records.
fn bucket_timeline(records: &[Record], start: i64, end: i64, bucket_count: usize) -> Vec<TimelineBucket> {
    if bucket_count == 0 || end <= start {
        return Vec::new();
    }
    let range = (end - start) as f64;
    let mut sums = vec![(0.0f64, 0.0f64, 0.0f64, 0u32); bucket_count];

    for record in records {
        let idx = (((record.timestamp - start) as f64 / range) * bucket_count as f64) as usize;
        let idx = idx.min(bucket_count - 1).max(0);
        let slot = &mut sums[idx];
        slot.0 += record.cpu_percent_normalized;
        slot.1 += record.memory_mb;
        slot.2 += record.memory_percent;
        slot.3 += 1;
    }

    (0..bucket_count)
        .map(|i| {
            let bucket_start = start + (range * i as f64 / bucket_count as f64) as i64;
            let (cpu_sum, mem_sum, pct_sum, count) = sums[i];
            let n = count.max(1) as f64;
            TimelineBucket {
                start: bucket_start,
                cpu_percent_normalized: if count > 0 { cpu_sum / n } else { 0.0 },
                memory_mb: if count > 0 { mem_sum / n } else { 0.0 },
                memory_percent: if count > 0 { pct_sum / n } else { 0.0 },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use tempfile::tempdir;

    fn sample(ts: i64, pid: u32, name: &str, cpu: f64, mem: f64) -> Record {
        Record {
            timestamp: ts,
            pid,
            ppid: 1,
            create_time: ts - 100,
            name: name.to_string(),
            cpu_percent_raw: cpu,
            cpu_percent_normalized: cpu,
            memory_mb: mem,
            memory_percent: mem / 10.0,
            threads: 1,
            disk_read_mb: 0.0,
            disk_write_mb: 0.0,
            net_sent_kb: 0.0,
            net_recv_kb: 0.0,
            is_active: cpu > 0.1,
            command: name.to_string(),
            working_dir: "/".to_string(),
            category: "other".to_string(),
        }
    }

    #[test]
    fn processes_dedup_keys_by_pid_never_by_name() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(dir.path().join("d.log"))).unwrap();
        let now = now_epoch();
        for pid in 1..=8u32 {
            store.append(sample(now, pid, "worker", 1.0, 1.0));
        }
        let api = QueryApi::new(&store);
        let summaries = api.processes(SortBy::Name, 3600);
        assert_eq!(summaries.len(), 8);
        let pids: std::collections::HashSet<u32> = summaries.iter().map(|s| s.pid).collect();
        assert_eq!(pids.len(), 8);
    }

    #[test]
    fn processes_keeps_most_recent_record_per_pid() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(dir.path().join("d.log"))).unwrap();
        let now = now_epoch();
        store.append(sample(now - 10, 1, "svc", 5.0, 5.0));
        store.append(sample(now, 1, "svc", 50.0, 50.0));
        let api = QueryApi::new(&store);
        let summaries = api.processes(SortBy::Cpu, 3600);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].cpu_percent_normalized, 50.0);
    }

    #[test]
    fn stats_timeline_has_requested_bucket_count() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(dir.path().join("d.log"))).unwrap();
        let now = now_epoch();
        for i in 0..10 {
            store.append(sample(now - i, i as u32, "w", 10.0, 10.0));
        }
        let api = QueryApi::new(&store);
        let snapshot = api.stats(3600, 20, 12);
        assert_eq!(snapshot.timeline.len(), 12);
    }

    #[test]
    fn empty_window_yields_zeroed_stats_without_panicking() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(dir.path().join("d.log"))).unwrap();
        let api = QueryApi::new(&store);
        let snapshot = api.stats(3600, 20, 60);
        assert_eq!(snapshot.process_count, 0);
        assert_eq!(snapshot.cpu_avg, 0.0);
    }

    #[test]
    fn live_uses_five_minute_window_and_top_twenty() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(StoreConfig::new(dir.path().join("d.log"))).unwrap();
        let now = now_epoch();
        for pid in 0..30u32 {
            store.append(sample(now, pid, "w", pid as f64, 1.0));
        }
        let api = QueryApi::new(&store);
        let snapshot = api.live();
        assert_eq!(snapshot.top_processes.len(), 20);
        assert!(snapshot.top_processes[0].cpu_percent_normalized >= snapshot.top_processes[1].cpu_percent_normalized);
    }
}
