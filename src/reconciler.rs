use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::Task;
use crate::store::TaskStore;
use crate::supervisor::ProcessSupervisor;

pub const STALE_AFTER_SECS: i64 = 120;
pub const BATCH_SIZE: i64 = 1000;
const FAILURE_PAUSE: Duration = Duration::from_secs(10);

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
  pub scanned: usize,
  pub refreshed: usize,
  pub restarted: usize,
  pub failed: usize,
}

/// Periodically compares this node's persisted long-running tasks with the
/// processes actually running and restarts the ones that died.
pub struct Reconciler {
  node: String,
  store: Arc<dyn TaskStore>,
  supervisor: Arc<ProcessSupervisor>,
  tick: Duration,
  stale_after: chrono::Duration,
  batch_size: i64,
}

impl Reconciler {
  pub fn new(node: impl Into<String>, store: Arc<dyn TaskStore>, supervisor: Arc<ProcessSupervisor>, tick: Duration) -> Self {
    Self {
      node: node.into(),
      store,
      supervisor,
      tick,
      stale_after: chrono::Duration::seconds(STALE_AFTER_SECS),
      batch_size: BATCH_SIZE,
    }
  }

  pub fn with_batch_size(mut self, batch_size: i64) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  pub async fn run(&self, cancel: CancellationToken) {
    info!(node = %self.node, tick = ?self.tick, "Reconciliation loop started");
    let mut ticker = interval(self.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("Received shutdown, reconciliation loop exit");
          return;
        }
        _ = ticker.tick() => {
          match self.sweep().await {
            Ok(report) => debug!(?report, "Reconciliation sweep finished"),
            Err(e) => {
              error!(error = %e, "Reconciliation sweep failed");
              tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(FAILURE_PAUSE) => {}
              }
            }
          }
        }
      }
    }
  }

  /// One pass over the node's long-running tasks, paged by ascending id.
  pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();
    let now = Utc::now();

    let bounds = tokio::try_join!(
      self.store.get_min_task_id(&self.node),
      self.store.get_max_task_id(&self.node),
    );
    let (min_id, max_id) = match bounds {
      Ok((Some(min_id), Some(max_id))) => (min_id, max_id),
      Ok(_) => return Ok(report),
      Err(e) => {
        debug!(error = %e, "Could not read task id bounds, skipping tick");
        return Ok(report);
      }
    };

    let mut offset = min_id;
    loop {
      let page = self.store.list_tasks(offset, self.batch_size, &self.node).await?;
      let Some(last_id) = page.last().map(|t| t.id) else {
        break;
      };
      debug!(offset, last_id, max_id, node = %self.node, "Checking client alive status");

      for task in &page {
        report.scanned += 1;
        if !task.is_stale(now, self.stale_after) {
          continue;
        }
        self.check(task, &mut report).await;
      }

      if last_id >= max_id {
        break;
      }
      offset = last_id + 1;
    }
    Ok(report)
  }

  async fn check(&self, task: &Task, report: &mut SweepReport) {
    if self.supervisor.is_alive(task.pid) {
      // Running but silent: keep it and remember its pid.
      if let Err(e) = self.store.update_heartbeat(task.id).await {
        error!(id = task.id, pid = task.pid, error = %e, "Failed to update heartbeat time");
        report.failed += 1;
        return;
      }
      if self.supervisor.exists(&task.job_id).await != Some(task.pid) {
        self.supervisor.adopt(&task.job_id, task.pid).await;
      }
      report.refreshed += 1;
      return;
    }

    info!(job_id = %task.job_id, node = %self.node, pid = task.pid, "Restarting dead task");
    if let Some(pid) = self.supervisor.exists(&task.job_id).await {
      let status = self.supervisor.stop_process(&task.job_id, pid, false).await;
      if !status.is_exited() {
        warn!(job_id = %task.job_id, pid, code = status.code(), "Remnant process not confirmed dead");
      }
    }

    let pid = match self
      .supervisor
      .start_process(&task.cmd, &task.args, &task.outfile, &task.errfile, &task.job_id)
      .await
    {
      Ok(pid) => pid,
      Err(e) => {
        error!(job_id = %task.job_id, cmd = %task.cmd, args = ?task.args, error = %e, "Failed to restart task");
        report.failed += 1;
        return;
      }
    };

    if let Err(e) = self.store.update_pid(task.id, pid).await {
      error!(id = task.id, pid, error = %e, "Failed to update PID");
      report.failed += 1;
      return;
    }
    report.restarted += 1;
  }
}
