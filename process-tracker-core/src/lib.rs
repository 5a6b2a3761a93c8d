//! process-tracker-core — shared library for the process-tracker ecosystem.
//!
//! Provides the four subsystems a process telemetry supervisor is built from:
//! - `metrics` — host core-count/memory lookups, cached for the process lifetime
//! - `process` — the `ProcessSource` contract and its `/proc`-backed implementation
//! - `categorize` — the process-tag classifier
//! - `record` — the `Record` type and the filter/normalize/enrich pipeline
//! - `store` — the append-only, version-tolerant record store
//! - `task` — user-declared process trees and their lifecycle state machine
//! - `alert` — declarative alert rules, firing/suppression/recovery, notifier dispatch
//! - `query` — the read-side surface a dashboard consumes
//! - `sampler` — the tick-driven loop that wires the above together

pub mod alert;
pub mod categorize;
pub mod metrics;
pub mod process;
pub mod query;
pub mod record;
pub mod sampler;
pub mod store;
pub mod task;

pub use record::Record;
pub use store::{RecordStore, StoreConfig, StoreError};
pub use task::{Task, TaskError, TaskStatus, TaskTracker};
