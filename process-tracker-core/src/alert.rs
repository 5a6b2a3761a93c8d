//! Declarative alert rules evaluated once per tick: aggregation over a
//! process subset or a system-wide metric, gated by a persistence duration,
//! with suppression-windowed re-firing and recovery detection.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_SUPPRESS_MINUTES: i64 = 30;
const NOTIFIER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuPercent,
    MemoryMb,
    SystemCpuPercent,
    SystemMemoryPercent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Max,
    Avg,
    Sum,
}

/// One user-declared alert rule. `process` is a substring filter over record
/// names; empty means "all records". `aggregation` is ignored for the two
/// `system_*` metrics, which are always whole-host sums.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub enabled: bool,
    pub metric: Metric,
    pub threshold: f64,
    pub duration_seconds: i64,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub process: String,
    pub channels: Vec<String>,
    #[serde(default = "default_suppress_minutes")]
    pub suppress_duration_minutes: i64,
}

fn default_suppress_minutes() -> i64 {
    DEFAULT_SUPPRESS_MINUTES
}

/// Runtime state for one rule, keyed by rule name. Created lazily on first
/// evaluation; not persisted across restarts.
#[derive(Debug, Clone, Default)]
struct AlertState {
    first_triggered_at: Option<i64>,
    last_value: f64,
    suppressed_until: Option<i64>,
    fired: bool,
}

/// `send(title, body)` contract. Implementations live outside the core
/// (webhook, dingtalk, wechat, feishu); the engine only holds a
/// `channel key -> Notifier` map.
pub trait Notifier: Send + Sync {
    fn send(&self, title: &str, body: &str) -> Result<(), String>;
}

pub struct AlertEngine {
    rules: Mutex<Vec<AlertRule>>,
    state: Mutex<HashMap<String, AlertState>>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, notifiers: HashMap<String, Arc<dyn Notifier>>) -> Self {
        Self {
            rules: Mutex::new(rules),
            state: Mutex::new(HashMap::new()),
            notifiers,
        }
    }

    /// Replaces the rule set. Called from the sampler thread only, at a tick
    /// boundary, in response to a command-channel reload request (spec §5:
    /// "external admin operations ... must go through a command channel
    /// consumed by the sampler at tick boundaries").
    pub fn reload_rules(&self, rules: Vec<AlertRule>) {
        *self.rules.lock().unwrap() = rules;
    }

    /// Evaluates every enabled rule against this tick's records and dispatches
    /// any resulting `alert_triggered`/`alert_resolved` events to the rule's
    /// configured channels. `now` is seconds since epoch.
    pub fn evaluate_tick(&self, records: &[Record], core_count: u32, total_memory_mb: f64, now: i64) {
        let rules = self.rules.lock().unwrap().clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            let value = observe(rule, records, core_count, total_memory_mb);
            self.evaluate_rule(rule, value, now);
        }
    }

    fn evaluate_rule(&self, rule: &AlertRule, value: f64, now: i64) {
        let over = value > rule.threshold;
        let mut states = self.state.lock().unwrap();
        let state = states.entry(rule.name.clone()).or_default();
        state.last_value = value;

        if over {
            let first = *state.first_triggered_at.get_or_insert(now);
            let held_for = now - first;

            if !state.fired && held_for >= rule.duration_seconds {
                state.fired = true;
                state.suppressed_until = Some(now + rule.suppress_duration_minutes * 60);
                drop(states);
                self.dispatch(rule, "alert_triggered", value);
                return;
            }
            if state.fired {
                let suppressed_until = state.suppressed_until.unwrap_or(now);
                if now >= suppressed_until {
                    state.suppressed_until = Some(now + rule.suppress_duration_minutes * 60);
                    drop(states);
                    self.dispatch(rule, "alert_triggered", value);
                }
            }
        } else if state.fired {
            let last_value = state.last_value;
            *state = AlertState::default();
            drop(states);
            self.dispatch(rule, "alert_resolved", last_value);
        } else {
            // Condition ended before ever reaching `fired`: clear the pending window.
            state.first_triggered_at = None;
        }
    }

    /// Dispatches synchronously to every configured channel, independently:
    /// a channel that errors or times out does not prevent the others from
    /// being tried. No retries.
    fn dispatch(&self, rule: &AlertRule, kind: &str, value: f64) {
        let (title, body) = message(rule, kind, value);
        for channel in &rule.channels {
            let Some(notifier) = self.notifiers.get(channel) else {
                warn!(rule = %rule.name, channel = %channel, "no notifier registered for channel");
                continue;
            };
            match send_with_timeout(notifier.clone(), title.clone(), body.clone(), NOTIFIER_TIMEOUT) {
                Ok(()) => info!(rule = %rule.name, channel = %channel, kind, "alert dispatched"),
                Err(e) => error!(rule = %rule.name, channel = %channel, kind, error = %e, "alert dispatch failed"),
            }
        }
    }
}

fn message(rule: &AlertRule, kind: &str, value: f64) -> (String, String) {
    match kind {
        "alert_triggered" => (
            format!("[firing] {}", rule.name),
            format!("{} exceeded threshold {} (value {:.2})", rule.name, rule.threshold, value),
        ),
        _ => (
            format!("[resolved] {}", rule.name),
            format!("{} recovered (last value {:.2})", rule.name, value),
        ),
    }
}

/// Runs `notifier.send` on a detached worker thread and waits up to
/// `timeout`. A notifier that hangs past the timeout is abandoned (its
/// thread may still be running) rather than blocking the sampler
/// indefinitely: unlike `std::thread::scope`, which only returns once every
/// spawned thread has finished, a plain `std::thread::spawn`'d thread is
/// never joined here, so a stuck `send` cannot hold up the caller.
fn send_with_timeout(
    notifier: Arc<dyn Notifier>,
    title: String,
    body: String,
    timeout: Duration,
) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = notifier.send(&title, &body);
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout)
        .unwrap_or_else(|_| Err("notifier timed out".to_string()))
}

fn observe(rule: &AlertRule, records: &[Record], core_count: u32, total_memory_mb: f64) -> f64 {
    match rule.metric {
        Metric::SystemCpuPercent => {
            if core_count == 0 {
                return 0.0;
            }
            let raw_sum: f64 = records.iter().map(|r| r.cpu_percent_raw).sum();
            (raw_sum / core_count as f64).clamp(0.0, 100.0)
        }
        Metric::SystemMemoryPercent => {
            if total_memory_mb <= 0.0 {
                return 0.0;
            }
            let mem_sum: f64 = records.iter().map(|r| r.memory_mb).sum();
            (mem_sum / total_memory_mb * 100.0).clamp(0.0, 100.0)
        }
        Metric::CpuPercent => aggregate(rule, records, |r| r.cpu_percent_raw),
        Metric::MemoryMb => aggregate(rule, records, |r| r.memory_mb),
    }
}

fn aggregate(rule: &AlertRule, records: &[Record], field: impl Fn(&Record) -> f64) -> f64 {
    let matching: Vec<f64> = records
        .iter()
        .filter(|r| rule.process.is_empty() || r.name.contains(&rule.process))
        .map(field)
        .collect();
    if matching.is_empty() {
        return 0.0;
    }
    match rule.aggregation {
        Aggregation::Max => matching.iter().cloned().fold(f64::MIN, f64::max),
        Aggregation::Sum => matching.iter().sum(),
        Aggregation::Avg => matching.iter().sum::<f64>() / matching.len() as f64,
    }
}
