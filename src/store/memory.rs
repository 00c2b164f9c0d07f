use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{NewTask, Task};
use crate::store::TaskStore;

/// In-process task store used by tests and local experiments.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
  inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  next_id: i64,
  tasks: BTreeMap<i64, Task>,
}

impl MemoryTaskStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overwrites a task's heartbeat, e.g. to make it look stale.
  pub async fn set_heartbeat(&self, id: i64, at: DateTime<Utc>) {
    if let Some(task) = self.inner.write().await.tasks.get_mut(&id) {
      task.heart_beat_time = at;
    }
  }

  pub async fn get(&self, id: i64) -> Option<Task> {
    self.inner.read().await.tasks.get(&id).cloned()
  }

  pub async fn all(&self) -> Vec<Task> {
    self.inner.read().await.tasks.values().cloned().collect()
  }
}

fn long_running_on<'a>(tasks: &'a BTreeMap<i64, Task>, node: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
  tasks.values().filter(move |t| t.node == node && !t.do_once)
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
  async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
    let mut inner = self.inner.write().await;
    if inner.tasks.values().any(|t| t.job_id == task.job_id) {
      return Err(StoreError::Duplicate(task.job_id));
    }
    inner.next_id += 1;
    let now = Utc::now();
    let row = Task {
      id: inner.next_id,
      job_id: task.job_id,
      node: task.node,
      pid: task.pid,
      cmd: task.cmd,
      args: task.args,
      outfile: task.outfile,
      errfile: task.errfile,
      dc: task.dc,
      ip: task.ip,
      big_one: task.big_one,
      load_method: task.load_method,
      do_once: task.do_once,
      heart_beat_time: now,
      create_time: now,
      update_time: now,
    };
    inner.tasks.insert(row.id, row.clone());
    Ok(row)
  }

  async fn delete_task_by_job_id(&self, job_id: &str) -> Result<u64, StoreError> {
    let mut inner = self.inner.write().await;
    let before = inner.tasks.len();
    inner.tasks.retain(|_, t| t.job_id != job_id);
    Ok((before - inner.tasks.len()) as u64)
  }

  async fn find_task_by_job_id(&self, job_id: &str) -> Result<Option<Task>, StoreError> {
    Ok(self.inner.read().await.tasks.values().find(|t| t.job_id == job_id).cloned())
  }

  async fn find_task_by_node_and_pid(&self, node: &str, pid: i32) -> Result<Option<Task>, StoreError> {
    Ok(self.inner.read().await.tasks.values().find(|t| t.node == node && t.pid == pid).cloned())
  }

  async fn find_big_one(&self, name: &str) -> Result<Option<Task>, StoreError> {
    Ok(self.inner.read().await.tasks.values().find(|t| !name.is_empty() && t.big_one == name).cloned())
  }

  async fn get_max_task_id(&self, node: &str) -> Result<Option<i64>, StoreError> {
    Ok(long_running_on(&self.inner.read().await.tasks, node).map(|t| t.id).max())
  }

  async fn get_min_task_id(&self, node: &str) -> Result<Option<i64>, StoreError> {
    Ok(long_running_on(&self.inner.read().await.tasks, node).map(|t| t.id).min())
  }

  async fn list_tasks(&self, start_id: i64, batch_size: i64, node: &str) -> Result<Vec<Task>, StoreError> {
    let inner = self.inner.read().await;
    Ok(
      long_running_on(&inner.tasks, node)
        .filter(|t| t.id >= start_id)
        .take(batch_size.max(0) as usize)
        .cloned()
        .collect(),
    )
  }

  async fn update_heartbeat(&self, id: i64) -> Result<(), StoreError> {
    if let Some(task) = self.inner.write().await.tasks.get_mut(&id) {
      let now = Utc::now();
      task.heart_beat_time = now;
      task.update_time = now;
    }
    Ok(())
  }

  async fn update_pid(&self, id: i64, pid: i32) -> Result<(), StoreError> {
    if let Some(task) = self.inner.write().await.tasks.get_mut(&id) {
      let now = Utc::now();
      task.pid = pid;
      task.heart_beat_time = now;
      task.update_time = now;
    }
    Ok(())
  }

  async fn count_tasks_by_node(&self) -> Result<HashMap<String, i64>, StoreError> {
    let mut counts = HashMap::new();
    for task in self.inner.read().await.tasks.values().filter(|t| !t.do_once) {
      *counts.entry(task.node.clone()).or_insert(0) += 1;
    }
    Ok(counts)
  }

  async fn count_tasks_for_node(&self, node: &str) -> Result<i64, StoreError> {
    Ok(long_running_on(&self.inner.read().await.tasks, node).count() as i64)
  }
}
