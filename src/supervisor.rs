//! Local OS-process control: start detached jobs, stop them with signal
//! escalation and a bounded reap, and probe their liveness.
//!
//! The handle table maps job id to pid for processes started (or re-adopted)
//! by this daemon instance. It is an index only; the persisted task record is
//! authoritative and the table starts empty after a restart.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use sysinfo::{ProcessStatus, System};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;

/// Environment variable carrying `node:jobID` into every supervised child.
pub const TOKEN_ENV: &str = "TASK_TOKEN";

const REAP_TIMEOUT: Duration = Duration::from_secs(5);
const REAP_POLL: Duration = Duration::from_millis(50);
const TERM_ATTEMPTS: usize = 3;
const TERM_PAUSE: Duration = Duration::from_millis(100);

/// Outcome of `stop_process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
  /// Exit confirmed.
  Exited,
  /// The reap call failed for a reason other than "no such child".
  ReapFailed,
  /// The process was still running when the reap window closed.
  NotKilledInTime,
}

impl StopStatus {
  pub fn code(&self) -> i32 {
    match self {
      StopStatus::Exited => 0,
      StopStatus::ReapFailed => -1,
      StopStatus::NotKilledInTime => -2,
    }
  }

  pub fn is_exited(&self) -> bool {
    matches!(self, StopStatus::Exited)
  }
}

#[derive(Debug)]
pub struct ProcessSupervisor {
  node: String,
  procs: RwLock<HashMap<String, i32>>,
}

impl ProcessSupervisor {
  pub fn new(node: impl Into<String>) -> Self {
    Self {
      node: node.into(),
      procs: RwLock::new(HashMap::new()),
    }
  }

  pub fn node(&self) -> &str {
    &self.node
  }

  pub fn token_for(&self, job_id: &str) -> String {
    format!("{}:{}", self.node, job_id)
  }

  /// Spawns `cmd` detached in its own process group with stdout/stderr
  /// appended to the given files, and records `job_id -> pid`.
  pub async fn start_process(
    &self,
    cmd: &str,
    args: &[String],
    stdout_path: &str,
    stderr_path: &str,
    job_id: &str,
  ) -> Result<i32, ProcessError> {
    let stdout = open_output(stdout_path)?;
    let stderr = open_output(stderr_path)?;

    let child = Command::new(cmd)
      .args(args)
      .env(TOKEN_ENV, self.token_for(job_id))
      .stdin(Stdio::null())
      .stdout(stdout)
      .stderr(stderr)
      .process_group(0)
      .spawn()
      .map_err(|source| ProcessError::Spawn { cmd: cmd.to_string(), source })?;

    // The child is reaped by stop_process; dropping the handle does not wait.
    let pid = child.id() as i32;
    self.procs.write().await.insert(job_id.to_string(), pid);
    info!(job_id, pid, cmd, "Process started");
    Ok(pid)
  }

  /// Signals `pid` and waits up to five seconds for it to exit.
  ///
  /// `force` sends SIGKILL straight away. Otherwise SIGTERM is sent up to three
  /// times; if the process is still running when the reap window closes it is
  /// killed and `NotKilledInTime` is returned. The handle table is left alone.
  pub async fn stop_process(&self, job_id: &str, pid: i32, force: bool) -> StopStatus {
    let target = Pid::from_raw(pid);
    if pid <= 0 {
      warn!(job_id, pid, "Refusing to signal a non-positive pid");
      return StopStatus::ReapFailed;
    }

    if force {
      send_signal(target, Signal::SIGKILL);
      return wait_for_exit(target).await;
    }

    for attempt in 1..=TERM_ATTEMPTS {
      send_signal(target, Signal::SIGTERM);
      sleep(TERM_PAUSE).await;
      if let Some(status) = try_reap(target) {
        debug!(job_id, pid, attempt, "Process exited after SIGTERM");
        return status;
      }
    }

    let status = wait_for_exit(target).await;
    if status == StopStatus::NotKilledInTime {
      error!(job_id, pid, "Process is not killed after 5 seconds, escalating to SIGKILL");
      send_signal(target, Signal::SIGKILL);
      sleep(REAP_POLL).await;
      let _ = try_reap(target);
    }
    status
  }

  /// False for zombie, stopped or missing processes, and whenever the probe fails.
  pub fn is_alive(&self, pid: i32) -> bool {
    if pid <= 0 {
      return false;
    }
    let sys_pid = sysinfo::Pid::from_u32(pid as u32);
    let mut sys = System::new();
    if !sys.refresh_process(sys_pid) {
      debug!(pid, "Process not found");
      return false;
    }
    match sys.process(sys_pid).map(|p| p.status()) {
      Some(ProcessStatus::Zombie) | Some(ProcessStatus::Stop) | Some(ProcessStatus::Dead) => {
        debug!(pid, "Process is zombie or stopped");
        false
      }
      Some(_) => true,
      None => false,
    }
  }

  pub async fn exists(&self, job_id: &str) -> Option<i32> {
    self.procs.read().await.get(job_id).copied()
  }

  /// Records a pid learned from the persisted task record.
  pub async fn adopt(&self, job_id: &str, pid: i32) {
    self.procs.write().await.insert(job_id.to_string(), pid);
  }

  pub async fn remove(&self, job_id: &str) -> Option<i32> {
    self.procs.write().await.remove(job_id)
  }

  /// Runs `cmd` in the foreground with inherited stdio until it exits or
  /// `limit` elapses; the child is killed on timeout.
  pub async fn run_to_completion(&self, cmd: &str, args: &[String], limit: Duration) -> Result<(), ProcessError> {
    let mut child = tokio::process::Command::new(cmd)
      .args(args)
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| ProcessError::Spawn { cmd: cmd.to_string(), source })?;

    match timeout(limit, child.wait()).await {
      Ok(Ok(status)) if status.success() => Ok(()),
      Ok(Ok(status)) => Err(ProcessError::Failed { cmd: cmd.to_string(), status }),
      Ok(Err(source)) => Err(ProcessError::Wait { cmd: cmd.to_string(), source }),
      Err(_) => Err(ProcessError::Timeout { cmd: cmd.to_string(), secs: limit.as_secs() }),
    }
  }
}

fn open_output(path: &str) -> Result<File, ProcessError> {
  OpenOptions::new()
    .create(true)
    .append(true)
    .mode(0o644)
    .open(path)
    .map_err(|source| ProcessError::OutputFile { path: path.to_string(), source })
}

fn send_signal(pid: Pid, signal: Signal) {
  if let Err(e) = kill(pid, signal) {
    error!(pid = pid.as_raw(), ?signal, error = %e, "Failed to signal process");
  }
}

// None while the process is still running.
fn try_reap(pid: Pid) -> Option<StopStatus> {
  match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
    Ok(WaitStatus::StillAlive) => None,
    Ok(_) => Some(StopStatus::Exited),
    // Not our child (e.g. started by a previous daemon instance): fall back to
    // an existence probe.
    Err(Errno::ECHILD) => match kill(pid, None) {
      Err(Errno::ESRCH) => Some(StopStatus::Exited),
      _ => None,
    },
    Err(Errno::EINTR) => None,
    Err(e) => {
      error!(pid = pid.as_raw(), error = %e, "waitpid failed");
      Some(StopStatus::ReapFailed)
    }
  }
}

async fn wait_for_exit(pid: Pid) -> StopStatus {
  let reap = async {
    loop {
      if let Some(status) = try_reap(pid) {
        return status;
      }
      sleep(REAP_POLL).await;
    }
  };
  match timeout(REAP_TIMEOUT, reap).await {
    Ok(status) => {
      if status.is_exited() {
        info!(pid = pid.as_raw(), "Process is killed");
      }
      status
    }
    Err(_) => StopStatus::NotKilledInTime,
  }
}
