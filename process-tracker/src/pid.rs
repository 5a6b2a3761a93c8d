//! Shared helpers for finding/signaling the daemon by its PID file.
//! `process-trackerd` owns writing the file; this crate only reads it.

use std::path::{Path, PathBuf};

pub fn pid_file(data_dir: &Path) -> PathBuf {
    data_dir.join("process-tracker.pid")
}

pub fn read_pid(data_dir: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_file(data_dir)).ok()?.trim().parse().ok()
}

#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

#[cfg(unix)]
pub fn send_term(pid: i32) -> std::io::Result<()> {
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret == 0 { Ok(()) } else { Err(std::io::Error::last_os_error()) }
}

#[cfg(not(unix))]
pub fn send_term(_pid: i32) -> std::io::Result<()> {
    Err(std::io::Error::other("signaling requires a unix target"))
}
