//! The tick-driven loop: calls `ProcessSource`, filters/normalizes/enriches
//! into `Record`s, then feeds RecordStore, TaskTracker, and AlertEngine in
//! that order (§4.4). Owns no thread itself — the daemon binary drives
//! `tick()` from its own ticker so it can also own signal handling.

use crate::alert::AlertEngine;
use crate::metrics::SystemMetrics;
use crate::process::fs::FileSystem;
use crate::process::{ProcessSource, ProcessSourceError};
use crate::record::{self, Record};
use crate::store::RecordStore;
use crate::task::{ProcessLauncher, TaskTracker};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Ticks after which a heartbeat line is logged (spec §4.4 step 4).
const HEARTBEAT_EVERY: u64 = 12;

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub struct Sampler<S: ProcessSource, F: FileSystem, L: ProcessLauncher> {
    source: S,
    metrics: Arc<SystemMetrics<F>>,
    store: Arc<RecordStore>,
    tasks: Arc<TaskTracker<L>>,
    alerts: Arc<AlertEngine>,
    tick_count: u64,
    loop_started_at: Instant,
}

impl<S: ProcessSource, F: FileSystem, L: ProcessLauncher> Sampler<S, F, L> {
    pub fn new(
        source: S,
        metrics: Arc<SystemMetrics<F>>,
        store: Arc<RecordStore>,
        tasks: Arc<TaskTracker<L>>,
        alerts: Arc<AlertEngine>,
    ) -> Self {
        Self {
            source,
            metrics,
            store,
            tasks,
            alerts,
            tick_count: 0,
            loop_started_at: Instant::now(),
        }
    }

    /// Runs exactly one tick: snapshot, filter/normalize/enrich, then fan out
    /// to the store, task tracker, and alert engine in that fixed order.
    /// Errors from any one step are logged; they never abort the loop.
    pub fn tick(&mut self) -> Vec<Record> {
        self.tick_count += 1;
        let now = now_epoch();

        let infos = match self.source.snapshot() {
            Ok(infos) => infos,
            Err(ProcessSourceError::Enumerate(e)) => {
                warn!(error = %e, "process snapshot failed for this tick");
                Vec::new()
            }
        };

        let records: Vec<Record> = infos
            .iter()
            .filter_map(|info| record::enrich(info, &self.metrics, now))
            .collect();

        self.store.append_all(records.iter().cloned());
        self.tasks.tick(&records);
        self.alerts.evaluate_tick(
            &records,
            self.metrics.core_count(),
            self.metrics.total_memory_mb(),
            now,
        );

        if self.tick_count.is_multiple_of(HEARTBEAT_EVERY) {
            info!(
                tick = self.tick_count,
                elapsed_secs = self.loop_started_at.elapsed().as_secs(),
                samples = records.len(),
                "sampler heartbeat"
            );
        }

        records
    }

    /// Flushes the store's pending batch; called at shutdown (spec §5) and
    /// safe to call at the start of every tick as a best-effort flush.
    pub fn flush(&self) {
        self.store.flush();
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}
