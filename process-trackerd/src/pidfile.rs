//! PID-file lifecycle: refuse to start a second daemon against the same
//! data directory, and clean up after ourselves on graceful shutdown.

use std::fs;
use std::path::{Path, PathBuf};

pub struct PidFile {
    path: PathBuf,
}

/// A pid file couldn't be acquired, either because another live process
/// already holds it (exit 2) or due to an unrelated I/O failure (exit 1).
pub enum AcquireError {
    AlreadyRunning(String),
    Io(String),
}

impl PidFile {
    /// Creates the pid file for this process, refusing to start if another
    /// live process already holds it (spec §7: daemon already running ->
    /// the second invocation must not silently double-sample).
    pub fn acquire(dir: &Path) -> Result<Self, AcquireError> {
        fs::create_dir_all(dir).map_err(|e| AcquireError::Io(format!("failed to create data dir: {e}")))?;
        let path = dir.join("process-tracker.pid");

        if let Ok(existing) = fs::read_to_string(&path)
            && let Ok(pid) = existing.trim().parse::<i32>()
            && process_is_alive(pid)
        {
            return Err(AcquireError::AlreadyRunning(format!("process-trackerd already running (pid {pid})")));
        }

        fs::write(&path, std::process::id().to_string())
            .map_err(|e| AcquireError::Io(format!("failed to write pid file: {e}")))?;
        Ok(Self { path })
    }

    pub fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    // Signal 0: existence probe, no actual signal delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    false
}
