//! Append-only record store: batched writes, size-bounded rotation, age-based
//! compression and deletion, and version-tolerant reads across rotated and
//! compressed segments.

pub mod format;

use crate::record::Record;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rotation and retention policy for one store. Mirrors the knobs the spec
/// names: batch size, size-bounded rotation, age-based compression/cleanup,
/// and a cap on the number of retained segment files.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_file: PathBuf,
    pub batch_size: usize,
    pub max_file_size_mb: u64,
    pub compress_after_days: u64,
    pub cleanup_after_days: u64,
    pub max_files: usize,
}

impl StoreConfig {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            batch_size: 100,
            max_file_size_mb: 50,
            compress_after_days: 3,
            cleanup_after_days: 30,
            max_files: 1000,
        }
    }
}

#[derive(Default)]
struct Batch {
    records: Vec<Record>,
    /// Set when a previous flush failed; `true` once this batch has already
    /// been retried once (a second failure drops it).
    retry: Option<bool>,
}

pub struct RecordStore {
    config: StoreConfig,
    batch: Mutex<Batch>,
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            config,
            batch: Mutex::new(Batch::default()),
        })
    }

    /// Appends one record to the in-memory batch, flushing if the batch has
    /// reached its configured threshold.
    pub fn append(&self, record: Record) {
        let should_flush = {
            let mut batch = self.batch.lock().unwrap();
            batch.records.push(record);
            batch.records.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush();
        }
    }

    pub fn append_all(&self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.append(record);
        }
    }

    /// Best-effort flush: called at batch threshold, at the start of every
    /// sampler tick, and at shutdown. A write failure retains the batch for
    /// exactly one further retry before it is dropped.
    pub fn flush(&self) {
        let (mut to_write, already_retried) = {
            let mut batch = self.batch.lock().unwrap();
            if batch.records.is_empty() {
                return;
            }
            let retried = batch.retry.take().unwrap_or(false);
            (std::mem::take(&mut batch.records), retried)
        };
        to_write.sort_by_key(|r| r.timestamp);

        match self.write_rows(&to_write) {
            Ok(()) => {
                self.maybe_rotate();
            }
            Err(e) => {
                if already_retried {
                    tracing::error!(
                        error = %e,
                        dropped = to_write.len(),
                        "store write failed twice, dropping batch"
                    );
                } else {
                    warn!(error = %e, "store write failed, retaining batch for one retry");
                    let mut batch = self.batch.lock().unwrap();
                    let mut retained = to_write;
                    retained.append(&mut batch.records);
                    batch.records = retained;
                    batch.retry = Some(true);
                }
            }
        }
    }

    fn write_rows(&self, records: &[Record]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.data_file)?;
        for record in records {
            writeln!(file, "{}", format::encode(record))?;
        }
        file.flush()
    }

    fn maybe_rotate(&self) {
        let size = match fs::metadata(&self.config.data_file) {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };
        if size < self.config.max_file_size_mb * 1024 * 1024 {
            return;
        }
        let rotated = self
            .config
            .data_file
            .with_file_name(format!(
                "{}.{}",
                self.config.data_file.file_name().unwrap().to_string_lossy(),
                now_epoch()
            ));
        if let Err(e) = fs::rename(&self.config.data_file, &rotated) {
            warn!(error = %e, "rotation failed, leaving segment unrotated");
            return;
        }
        info!(path = %rotated.display(), bytes = size, "rotated segment");
        self.maintain();
    }

    /// Compresses rotated segments older than `compress_after_days` and
    /// deletes anything (rotated or compressed) older than
    /// `cleanup_after_days`, then enforces `max_files`. Safe to call
    /// periodically from a background task as well as in-line at rotation.
    pub fn maintain(&self) {
        let segments = match self.list_rotated_segments() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to list segments for maintenance");
                return;
            }
        };
        let now = now_epoch();
        let compress_age = self.config.compress_after_days as i64 * 86400;
        let cleanup_age = self.config.cleanup_after_days as i64 * 86400;

        for seg in &segments {
            let age = now - seg.timestamp;
            if age >= cleanup_age {
                if let Err(e) = fs::remove_file(&seg.path) {
                    warn!(path = %seg.path.display(), error = %e, "failed to delete expired segment");
                } else {
                    info!(path = %seg.path.display(), age_days = age / 86400, "deleted expired segment");
                }
                continue;
            }
            if !seg.compressed && age >= compress_age {
                if let Err(e) = self.compress_segment(&seg.path) {
                    warn!(path = %seg.path.display(), error = %e, "compression failed, retrying next cycle");
                }
            }
        }

        self.enforce_max_files();
    }

    fn compress_segment(&self, path: &Path) -> std::io::Result<()> {
        let gz_path = PathBuf::from(format!("{}.gz", path.display()));
        let data = fs::read(path)?;
        let tmp_path = PathBuf::from(format!("{}.tmp", gz_path.display()));
        {
            let tmp_file = File::create(&tmp_path)?;
            let mut encoder = GzEncoder::new(tmp_file, Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
        }
        fs::rename(&tmp_path, &gz_path)?;
        fs::remove_file(path)?;
        info!(from = %path.display(), to = %gz_path.display(), "compressed segment");
        Ok(())
    }

    fn enforce_max_files(&self) {
        let mut segments = match self.list_rotated_segments() {
            Ok(s) => s,
            Err(_) => return,
        };
        if segments.len() <= self.config.max_files {
            return;
        }
        segments.sort_by_key(|s| s.timestamp);
        let excess = segments.len() - self.config.max_files;
        for seg in segments.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&seg.path) {
                warn!(path = %seg.path.display(), error = %e, "failed to delete segment over max_files bound");
            }
        }
    }

    /// Rotated/compressed segments (never the active file), oldest-first
    /// ordering is the caller's job.
    fn list_rotated_segments(&self) -> std::io::Result<Vec<Segment>> {
        let dir = self
            .config
            .data_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = self.config.data_file.file_name().unwrap().to_string_lossy().into_owned();

        let mut segments = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == stem {
                continue; // active file
            }
            let Some(rest) = name.strip_prefix(&format!("{stem}.")) else {
                continue;
            };
            let (ts_part, compressed) = match rest.strip_suffix(".gz") {
                Some(inner) => (inner, true),
                None => (rest, false),
            };
            let Ok(timestamp) = ts_part.parse::<i64>() else {
                continue;
            };
            segments.push(Segment {
                path: entry.path(),
                timestamp,
                compressed,
            });
        }
        Ok(segments)
    }

    /// All records with `timestamp >= since`, across every segment
    /// (compressed, rotated, and active), returned in non-decreasing
    /// timestamp order. A segment that fails to open or decompress is
    /// skipped entirely; a malformed row within a segment is skipped but its
    /// siblings are kept.
    pub fn read_window(&self, since: i64) -> Vec<Record> {
        self.flush();

        let mut out = Vec::new();
        let mut segments = self.list_rotated_segments().unwrap_or_default();
        segments.sort_by_key(|s| std::cmp::Reverse(s.timestamp));

        for seg in &segments {
            match self.read_segment(&seg.path, seg.compressed) {
                Ok(records) => {
                    let max_ts = records.iter().map(|r| r.timestamp).max().unwrap_or(i64::MIN);
                    out.extend(records.into_iter().filter(|r| r.timestamp >= since));
                    if max_ts < since {
                        break;
                    }
                }
                Err(e) => {
                    warn!(path = %seg.path.display(), error = %e, "failed to read segment, skipping");
                }
            }
        }

        if let Ok(active) = self.read_segment(&self.config.data_file, false) {
            out.extend(active.into_iter().filter(|r| r.timestamp >= since));
        }

        out.sort_by_key(|r| r.timestamp);
        out
    }

    fn read_segment(&self, path: &Path, compressed: bool) -> std::io::Result<Vec<Record>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let mut records = Vec::new();
        if compressed {
            let mut decoder = GzDecoder::new(file);
            let mut content = String::new();
            decoder.read_to_string(&mut content)?;
            for line in content.lines() {
                if let Some(record) = format::decode(line) {
                    records.push(record);
                }
            }
        } else {
            for line in BufReader::new(file).lines() {
                let line = line?;
                if let Some(record) = format::decode(&line) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

struct Segment {
    path: PathBuf,
    timestamp: i64,
    compressed: bool,
}
