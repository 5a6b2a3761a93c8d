//! User-declared process trees: lifecycle state machine, descendant
//! discovery from the current snapshot's ppid links, and EWMA-smoothed
//! resource roll-ups.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

const EWMA_ALPHA: f64 = 0.2;
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub command: String,
    pub priority: i32,
    pub status: TaskStatus,
    pub root_pid: Option<u32>,
    /// Captured the first tick the root process is observed; used to detect
    /// pid reuse on later ticks (a mismatch means the original process exited).
    pub root_create_time: Option<i64>,
    pub process_count: usize,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub total_cpu: f64,
    pub total_memory: f64,
    pub total_disk_io: f64,
    pub total_net_io: f64,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(u64),
    #[error("task {0} is running and cannot be deleted")]
    RunningCannotDelete(u64),
    #[error("task {0} is not running")]
    NotRunning(u64),
    #[error("failed to spawn task: {0}")]
    Spawn(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Spawns, signals, and reaps the leader process for a task. Abstracted so
/// the state machine is testable without actually forking shells.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, command: &str) -> std::io::Result<u32>;
    /// Sends SIGTERM (or SIGKILL if `force`) to the process group led by `pid`.
    fn signal_group(&self, pid: u32, force: bool) -> std::io::Result<()>;
    /// `true` if the leader process still exists (e.g. `kill(pid, 0)`).
    fn is_alive(&self, pid: u32) -> bool;
    /// Non-blocking reap: `Ok(Some(code))` once the child has exited,
    /// `Ok(None)` while still running, `Err` if it isn't our child (e.g.
    /// after a supervisor restart).
    fn try_wait(&self, pid: u32) -> std::io::Result<Option<i32>>;
}

#[cfg(unix)]
pub struct ShellLauncher;

#[cfg(unix)]
impl ProcessLauncher for ShellLauncher {
    fn spawn(&self, command: &str) -> std::io::Result<u32> {
        use std::os::unix::process::CommandExt;
        use std::process::Command;

        // SAFETY: pre_exec runs after fork, before exec, in the child only;
        // setsid() just gives the leader its own process group so stop_task
        // can signal the whole group.
        let child = unsafe {
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .pre_exec(|| {
                    libc::setsid();
                    Ok(())
                })
                .spawn()?
        };
        Ok(child.id())
    }

    fn signal_group(&self, pid: u32, force: bool) -> std::io::Result<()> {
        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: kill() with a negative pid targets the whole process
        // group; no memory is touched, only a syscall is made.
        let rc = unsafe { libc::kill(-(pid as i32), sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        // SAFETY: signal 0 only probes existence/permission, no signal is sent.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    fn try_wait(&self, pid: u32) -> std::io::Result<Option<i32>> {
        let mut status: libc::c_int = 0;
        // SAFETY: waitpid with WNOHANG only inspects kernel state for `pid`.
        let rc = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, libc::WNOHANG) };
        if rc == 0 {
            Ok(None)
        } else if rc == pid as libc::pid_t {
            if libc::WIFEXITED(status) {
                Ok(Some(libc::WEXITSTATUS(status)))
            } else {
                Ok(Some(-1))
            }
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Builds the ppid -> children index and walks it from `root_pid`,
/// including the root itself. Returns an empty set if the root isn't
/// present in this tick's snapshot.
fn descendant_set(records: &[Record], root_pid: u32) -> HashSet<u32> {
    if !records.iter().any(|r| r.pid == root_pid) {
        return HashSet::new();
    }
    let mut children_of: HashMap<u32, Vec<u32>> = HashMap::new();
    for r in records {
        children_of.entry(r.ppid).or_default().push(r.pid);
    }
    let mut set = HashSet::new();
    let mut stack = vec![root_pid];
    while let Some(pid) = stack.pop() {
        if set.insert(pid) {
            if let Some(children) = children_of.get(&pid) {
                stack.extend(children.iter().copied());
            }
        }
    }
    set
}

pub struct TaskTracker<L: ProcessLauncher = ShellLauncherOrStub> {
    launcher: L,
    store_path: PathBuf,
    tasks: RwLock<Vec<Task>>,
    next_id: RwLock<u64>,
}

#[cfg(unix)]
pub type ShellLauncherOrStub = ShellLauncher;
#[cfg(not(unix))]
pub type ShellLauncherOrStub = NullLauncher;

/// No-op launcher for non-unix builds, where process-group signaling isn't
/// available; `start_task`/`stop_task` report errors rather than pretending
/// to manage a process.
#[cfg(not(unix))]
pub struct NullLauncher;

#[cfg(not(unix))]
impl ProcessLauncher for NullLauncher {
    fn spawn(&self, _command: &str) -> std::io::Result<u32> {
        Err(std::io::Error::other("task spawning requires a unix target"))
    }
    fn signal_group(&self, _pid: u32, _force: bool) -> std::io::Result<()> {
        Err(std::io::Error::other("task signaling requires a unix target"))
    }
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
    fn try_wait(&self, _pid: u32) -> std::io::Result<Option<i32>> {
        Err(std::io::Error::other("task waiting requires a unix target"))
    }
}

impl TaskTracker<ShellLauncherOrStub> {
    pub fn new(store_path: impl Into<PathBuf>) -> Result<Self, TaskError> {
        Self::with_launcher(store_path, ShellLauncherOrStub::default_instance())
    }
}

#[cfg(unix)]
impl ShellLauncherOrStub {
    fn default_instance() -> Self {
        ShellLauncher
    }
}
#[cfg(not(unix))]
impl ShellLauncherOrStub {
    fn default_instance() -> Self {
        NullLauncher
    }
}

impl<L: ProcessLauncher> TaskTracker<L> {
    pub fn with_launcher(store_path: impl Into<PathBuf>, launcher: L) -> Result<Self, TaskError> {
        let store_path = store_path.into();
        let tasks = Self::load(&store_path)?;
        let next_id = tasks_len_plus_one(&tasks);
        Ok(Self {
            launcher,
            store_path,
            tasks: RwLock::new(tasks),
            next_id: RwLock::new(next_id),
        })
    }

    fn load(path: &Path) -> Result<Vec<Task>, TaskError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn persist(&self, tasks: &[Task]) -> Result<(), TaskError> {
        let tmp_path = self.store_path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(tasks)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.store_path)?;
        Ok(())
    }

    pub fn create_task(&self, name: impl Into<String>, command: impl Into<String>, priority: i32) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().unwrap();
        let mut next_id = self.next_id.write().unwrap();
        let id = *next_id;
        *next_id += 1;

        let task = Task {
            id,
            name: name.into(),
            command: command.into(),
            priority,
            status: TaskStatus::Pending,
            root_pid: None,
            root_create_time: None,
            process_count: 0,
            created_at: now_epoch(),
            started_at: None,
            completed_at: None,
            exit_code: None,
            error_message: None,
            total_cpu: 0.0,
            total_memory: 0.0,
            total_disk_io: 0.0,
            total_net_io: 0.0,
        };
        tasks.push(task.clone());
        self.persist(&tasks)?;
        Ok(task)
    }

    pub fn start_task(&self, id: u64) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks.iter_mut().find(|t| t.id == id).ok_or(TaskError::NotFound(id))?;

        match self.launcher.spawn(&task.command) {
            Ok(pid) => {
                task.status = TaskStatus::Running;
                task.root_pid = Some(pid);
                task.root_create_time = None;
                task.started_at = Some(now_epoch());
                info!(task_id = id, pid, "task started");
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(e.to_string());
                task.completed_at = Some(now_epoch());
                warn!(task_id = id, error = %e, "task spawn failed");
            }
        }
        let result = task.clone();
        self.persist(&tasks)?;
        Ok(result)
    }

    pub fn stop_task(&self, id: u64) -> Result<Task, TaskError> {
        let root_pid = {
            let tasks = self.tasks.read().unwrap();
            let task = tasks.iter().find(|t| t.id == id).ok_or(TaskError::NotFound(id))?;
            if task.status != TaskStatus::Running {
                return Err(TaskError::NotRunning(id));
            }
            task.root_pid.ok_or(TaskError::NotRunning(id))?
        };

        let _ = self.launcher.signal_group(root_pid, false);
        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline && self.launcher.is_alive(root_pid) {
            std::thread::sleep(Duration::from_millis(100));
        }
        if self.launcher.is_alive(root_pid) {
            if let Err(e) = self.launcher.signal_group(root_pid, true) {
                warn!(task_id = id, pid = root_pid, error = %e, "force-kill failed, disowning task");
            }
        }

        let mut tasks = self.tasks.write().unwrap();
        let task = tasks.iter_mut().find(|t| t.id == id).ok_or(TaskError::NotFound(id))?;
        task.status = TaskStatus::Stopped;
        task.completed_at = Some(now_epoch());
        let result = task.clone();
        self.persist(&tasks)?;
        Ok(result)
    }

    pub fn delete_task(&self, id: u64) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().unwrap();
        let idx = tasks.iter().position(|t| t.id == id).ok_or(TaskError::NotFound(id))?;
        if tasks[idx].status == TaskStatus::Running {
            return Err(TaskError::RunningCannotDelete(id));
        }
        tasks.remove(idx);
        self.persist(&tasks)?;
        Ok(())
    }

    pub fn get_task(&self, id: u64) -> Option<Task> {
        self.tasks.read().unwrap().iter().find(|t| t.id == id).cloned()
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .unwrap()
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Per-tick aggregation: recomputes each Running task's descendant set
    /// from the current records, applies the EWMA roll-up, and detects
    /// completion (root process gone) or pid reuse (root replaced).
    pub fn tick(&self, records: &[Record]) {
        // A wholesale-empty tick means the snapshot itself failed (or every
        // process vanished at once), not that every root process exited.
        // Leave Running tasks' counts untouched rather than completing them.
        if records.is_empty() {
            return;
        }

        let snapshot: Vec<Task> = self
            .tasks
            .read()
            .unwrap()
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .cloned()
            .collect();
        if snapshot.is_empty() {
            return;
        }

        let mut updates = Vec::new();
        for mut task in snapshot {
            let Some(root_pid) = task.root_pid else { continue };
            let root_record = records.iter().find(|r| r.pid == root_pid);

            let exited = match (root_record, task.root_create_time) {
                (None, _) => true,
                (Some(r), Some(prev_ct)) => r.create_time != prev_ct,
                (Some(r), None) => {
                    task.root_create_time = Some(r.create_time);
                    false
                }
            };

            if exited {
                self.complete_task(&mut task, root_pid);
                updates.push(task);
                continue;
            }

            let set = descendant_set(records, root_pid);
            task.process_count = set.len();
            let matching: Vec<&Record> = records.iter().filter(|r| set.contains(&r.pid)).collect();

            let cpu_sum: f64 = matching.iter().map(|r| r.cpu_percent_normalized).sum();
            let mem_sum: f64 = matching.iter().map(|r| r.memory_mb).sum();
            let disk_sum: f64 = matching.iter().map(|r| r.disk_read_mb + r.disk_write_mb).sum();
            let net_sum: f64 = matching.iter().map(|r| r.net_sent_kb + r.net_recv_kb).sum();

            task.total_cpu = ewma(task.total_cpu, cpu_sum);
            task.total_memory = ewma(task.total_memory, mem_sum);
            task.total_disk_io = ewma(task.total_disk_io, disk_sum);
            task.total_net_io = ewma(task.total_net_io, net_sum);
            updates.push(task);
        }

        let mut tasks = self.tasks.write().unwrap();
        for updated in updates {
            if let Some(slot) = tasks.iter_mut().find(|t| t.id == updated.id) {
                *slot = updated;
            }
        }
        if let Err(e) = self.persist(&tasks) {
            warn!(error = %e, "failed to persist task table after tick");
        }
    }

    fn complete_task(&self, task: &mut Task, root_pid: u32) {
        match self.launcher.try_wait(root_pid) {
            Ok(Some(0)) => {
                task.status = TaskStatus::Completed;
                task.exit_code = Some(0);
            }
            Ok(Some(code)) => {
                task.status = TaskStatus::Failed;
                task.exit_code = Some(code);
                task.error_message = Some(format!("process exited with code {code}"));
            }
            Ok(None) => {
                // Still running per waitpid but absent from the snapshot:
                // treat as gone, matching the spec's "descendant set empty
                // and root_pid absent" completion trigger.
                task.status = TaskStatus::Completed;
                task.exit_code = Some(0);
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(format!("wait failed: {e}"));
            }
        }
        task.completed_at = Some(now_epoch());
        task.process_count = 0;
        info!(task_id = task.id, status = ?task.status, "task completion detected");
    }
}

fn ewma(old: f64, current: f64) -> f64 {
    old * (1.0 - EWMA_ALPHA) + current * EWMA_ALPHA
}

fn tasks_len_plus_one(tasks: &[Task]) -> u64 {
    tasks.iter().map(|t| t.id).max().map(|m| m + 1).unwrap_or(1)
}
