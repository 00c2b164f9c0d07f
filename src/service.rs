//! Request handling shared by every route: decide where a job runs, run or
//! relay it, and keep the task store, handle table and membership counter in
//! step with each other.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ProcessError, RegistryError, ScheduleError, ServiceError};
use crate::forwarder::Forwarder;
use crate::load_reader::LoadReader;
use crate::membership::Membership;
use crate::models::{BigOne, JobCfg, JobReporter, JobRun, ListQuery, NewTask, ResourceInfo, Task};
use crate::scheduler::{Strategy, select_node};
use crate::store::TaskStore;
use crate::supervisor::ProcessSupervisor;

pub const DO_ONCE_LIMIT: Duration = Duration::from_secs(300);
pub const MAX_LIST_LIMIT: i64 = 1000;

static TOKEN_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(?P<node>[^:\s]+):(?P<job>[0-9A-Za-z_-]+)$").expect("token pattern compiles"));

#[derive(Debug, Serialize)]
pub struct SubmitReply {
  pub pid: i32,
  pub id: String,
  pub ctime: String,
  pub run: JobRun,
}

/// Everything a node needs to take part in scheduling. Absent in single mode.
pub struct Cluster {
  pub membership: Arc<Membership>,
  pub reader: LoadReader,
  pub forwarder: Forwarder,
  pub strategy: Strategy,
}

pub struct JobService {
  node: String,
  store: Arc<dyn TaskStore>,
  supervisor: Arc<ProcessSupervisor>,
  cluster: Option<Cluster>,
}

impl JobService {
  pub fn new(store: Arc<dyn TaskStore>, supervisor: Arc<ProcessSupervisor>, cluster: Option<Cluster>) -> Self {
    Self {
      node: supervisor.node().to_string(),
      store,
      supervisor,
      cluster,
    }
  }

  pub fn node(&self) -> &str {
    &self.node
  }

  pub async fn submit(&self, req: JobCfg) -> Result<Value, ServiceError> {
    validate(&req)?;

    let target = match &self.cluster {
      None if !req.node.is_empty() && req.node != self.node => {
        return Err(ServiceError::NotThisNode(req.node));
      }
      None => self.node.clone(),
      Some(_) if !req.node.is_empty() => req.node.clone(),
      Some(cluster) => self.select_target(cluster).await?,
    };

    if let Some(cluster) = self.cluster.as_ref().filter(|_| target != self.node) {
      info!(%target, cmd = %req.run.cmd, "Forwarding job submission");
      let address = resolve_address(cluster, &target).await?;
      let mut body = req;
      body.node = target;
      return Ok(cluster.forwarder.forward(&address, "/v1/jobs/submit", &body).await?);
    }

    match (req.do_once, req.big_one.is_empty()) {
      (false, _) => self.start_detached(req, false).await,
      (true, true) => self.run_once(req).await,
      (true, false) => {
        if let Some(running) = self.store.find_big_one(&req.big_one).await? {
          warn!(big_one = %req.big_one, job_id = %running.job_id, "Singleton job already running");
          return Err(ServiceError::BigOneRunning(req.big_one));
        }
        self.start_detached(req, true).await
      }
    }
  }

  // Registry snapshot first; the task store's per-node counts when the
  // registry cannot be read.
  async fn select_target(&self, cluster: &Cluster) -> Result<String, ScheduleError> {
    let chosen = match cluster.reader.snapshot().await {
      Ok(snapshot) => select_node(&snapshot, cluster.strategy),
      Err(e) => {
        warn!(error = %e, "Failed to read worker registry, scheduling by stored task counts");
        let snapshot: HashMap<String, ResourceInfo> = self
          .store
          .count_tasks_by_node()
          .await?
          .into_iter()
          .map(|(node, count)| (node, ResourceInfo::unsampled(count)))
          .collect();
        select_node(&snapshot, Strategy::TaskCount)
      }
    };
    chosen.ok_or(ScheduleError::NoWorker)
  }

  async fn start_detached(&self, req: JobCfg, singleton: bool) -> Result<Value, ServiceError> {
    let job_id = Uuid::new_v4().simple().to_string();
    let run = &req.run;
    let pid = self
      .supervisor
      .start_process(&run.cmd, &run.args, &run.outfile, &run.errfile, &job_id)
      .await
      .map_err(|e| {
        error!(%job_id, cmd = %run.cmd, args = ?run.args, error = %e, "Failed to start job");
        ServiceError::StartJobFail
      })?;

    let task = NewTask {
      job_id: job_id.clone(),
      node: self.node.clone(),
      pid,
      cmd: run.cmd.clone(),
      args: run.args.clone(),
      outfile: run.outfile.clone(),
      errfile: run.errfile.clone(),
      dc: req.dc.clone(),
      ip: req.ip.clone(),
      big_one: req.big_one.clone(),
      load_method: req.load_method.clone(),
      do_once: singleton,
    };
    let task = match self.store.create_task(task).await {
      Ok(task) => task,
      Err(e) => {
        // An unrecorded process would never be reconciled or stoppable.
        let status = self.supervisor.stop_process(&job_id, pid, true).await;
        self.supervisor.remove(&job_id).await;
        warn!(%job_id, pid, code = status.code(), "Stopped job that could not be persisted");
        return Err(e.into());
      }
    };

    if !singleton {
      if let Some(cluster) = &self.cluster {
        cluster.membership.increment_task_count().await;
      }
    }
    info!(%job_id, pid, node = %self.node, singleton, "Job started");

    let reply = SubmitReply {
      pid,
      id: task.job_id,
      ctime: task.create_time.to_rfc3339(),
      run: req.run,
    };
    serde_json::to_value(reply).map_err(|e| {
      error!(error = %e, "Failed to encode submit reply");
      ServiceError::Internal
    })
  }

  async fn run_once(&self, req: JobCfg) -> Result<Value, ServiceError> {
    let run = &req.run;
    info!(cmd = %run.cmd, args = ?run.args, "Running job in the foreground");
    match self.supervisor.run_to_completion(&run.cmd, &run.args, DO_ONCE_LIMIT).await {
      Ok(()) => Ok(json!({ "run": req.run })),
      Err(ProcessError::Timeout { cmd, secs }) => {
        error!(%cmd, secs, "Job execution timed out");
        Err(ServiceError::JobTimeout)
      }
      Err(e) => {
        error!(cmd = %run.cmd, error = %e, "Foreground job failed");
        Err(ServiceError::StartJobFail)
      }
    }
  }

  /// Force-stops a job wherever it runs and forgets it.
  pub async fn stop(&self, job_id: &str) -> Result<Value, ServiceError> {
    let task = self.store.find_task_by_job_id(job_id).await?.ok_or(ServiceError::JobNotFound)?;

    if task.node != self.node {
      let cluster = self.cluster.as_ref().ok_or_else(|| ServiceError::NotThisNode(task.node.clone()))?;
      let address = resolve_address(cluster, &task.node).await?;
      return Ok(cluster.forwarder.forward(&address, &format!("/v1/jobs/{job_id}/stop"), &json!({})).await?);
    }

    let pid = self.pid_of(&task).await;
    let status = self.supervisor.stop_process(job_id, pid, true).await;
    if !status.is_exited() {
      error!(%job_id, pid, code = status.code(), "Failed to stop job");
      return Err(ServiceError::StopJobFail);
    }

    self.store.delete_task_by_job_id(job_id).await?;
    self.supervisor.remove(job_id).await;
    if !task.do_once {
      if let Some(cluster) = &self.cluster {
        cluster.membership.decrement_task_count().await;
      }
    }
    info!(%job_id, pid, "Job stopped");
    Ok(json!({ "id": job_id, "pid": pid }))
  }

  /// Gracefully stops a singleton job. Unknown ids succeed.
  pub async fn stop_big_one(&self, req: BigOne) -> Result<Value, ServiceError> {
    let job_id = req.big_one_job_id.as_str();
    let Some(task) = self.store.find_task_by_job_id(job_id).await? else {
      info!(%job_id, "Singleton job already gone");
      return Ok(json!({ "id": job_id }));
    };
    if !task.is_big_one() {
      return Err(ServiceError::JobNotFound);
    }

    if task.node != self.node {
      let cluster = self.cluster.as_ref().ok_or_else(|| ServiceError::NotThisNode(task.node.clone()))?;
      let address = resolve_address(cluster, &task.node).await?;
      return Ok(cluster.forwarder.forward(&address, "/v1/jobs/stopBigOne", &req).await?);
    }

    let pid = self.pid_of(&task).await;
    let status = self.supervisor.stop_process(job_id, pid, false).await;
    if !status.is_exited() {
      error!(%job_id, pid, code = status.code(), "Failed to stop singleton job");
      return Err(ServiceError::StopJobFail);
    }
    self.store.delete_task_by_job_id(job_id).await?;
    self.supervisor.remove(job_id).await;
    info!(%job_id, big_one = %task.big_one, "Singleton job stopped");
    Ok(json!({ "id": job_id, "pid": pid }))
  }

  /// Records a liveness report sent by a supervised child.
  pub async fn report(&self, report: JobReporter) -> Result<Value, ServiceError> {
    let (node, job_id) = parse_token(&report.token)?;

    if node != self.node {
      let cluster = self.cluster.as_ref().ok_or_else(|| ServiceError::NotThisNode(node.to_string()))?;
      let address = resolve_address(cluster, node).await?;
      return Ok(cluster.forwarder.forward(&address, "/v1/agent/tasks/report", &report).await?);
    }

    let task = self
      .store
      .find_task_by_node_and_pid(node, report.pid)
      .await?
      .filter(|t| t.job_id == job_id)
      .ok_or(ServiceError::RecordNotFound)?;
    self.store.update_heartbeat(task.id).await?;
    Ok(json!({ "id": task.job_id }))
  }

  pub async fn list(&self, query: ListQuery) -> Result<Vec<Task>, ServiceError> {
    let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
    Ok(self.store.list_tasks(query.start.max(0), limit, &self.node).await?)
  }

  pub async fn info(&self, job_id: &str) -> Result<Task, ServiceError> {
    self.store.find_task_by_job_id(job_id).await?.ok_or(ServiceError::JobNotFound)
  }

  // The handle table wins; after a restart only the record knows the pid.
  async fn pid_of(&self, task: &Task) -> i32 {
    self.supervisor.exists(&task.job_id).await.unwrap_or(task.pid)
  }
}

fn validate(req: &JobCfg) -> Result<(), ServiceError> {
  if req.run.cmd.trim().is_empty() {
    return Err(ServiceError::BadRequest("run.cmd is required".into()));
  }
  if req.run.outfile.trim().is_empty() || req.run.errfile.trim().is_empty() {
    return Err(ServiceError::BadRequest("run.outfile and run.errfile are required".into()));
  }
  Ok(())
}

fn parse_token(token: &str) -> Result<(&str, &str), ServiceError> {
  let caps = TOKEN_RE
    .captures(token)
    .ok_or_else(|| ServiceError::BadRequest(format!("malformed token {token:?}")))?;
  match (caps.name("node"), caps.name("job")) {
    (Some(node), Some(job)) => Ok((node.as_str(), job.as_str())),
    _ => Err(ServiceError::BadRequest(format!("malformed token {token:?}"))),
  }
}

async fn resolve_address(cluster: &Cluster, node: &str) -> Result<String, ScheduleError> {
  match cluster.reader.resolve(node).await {
    Ok(worker) => Ok(worker.address()),
    Err(RegistryError::WorkerNotFound(_)) => Err(ScheduleError::NoWorker),
    Err(e) => Err(e.into()),
  }
}
