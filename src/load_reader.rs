use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::models::{ResourceInfo, WorkerNode};
use crate::registry::{Registry, WORKER_PREFIX, worker_key};

/// Read side of the worker registry.
#[derive(Clone)]
pub struct LoadReader {
  registry: Arc<dyn Registry>,
  max_age: Duration,
}

impl LoadReader {
  /// Entries whose last heartbeat is older than `max_age` are ignored.
  pub fn new(registry: Arc<dyn Registry>, max_age: Duration) -> Self {
    Self { registry, max_age }
  }

  /// All live, readable worker documents.
  pub async fn workers(&self) -> Result<Vec<WorkerNode>, RegistryError> {
    let now = Utc::now();
    let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
    let mut workers = Vec::new();
    for (key, raw) in self.registry.list(WORKER_PREFIX).await? {
      let worker = match serde_json::from_slice::<WorkerNode>(&raw) {
        Ok(worker) => worker,
        Err(e) => {
          warn!(%key, error = %e, "Skipping malformed worker entry");
          continue;
        }
      };
      if now - worker.last_beat > max_age {
        debug!(%key, last_beat = %worker.last_beat, "Skipping stale worker entry");
        continue;
      }
      workers.push(worker);
    }
    Ok(workers)
  }

  /// Resource snapshot keyed by host name.
  pub async fn snapshot(&self) -> Result<HashMap<String, ResourceInfo>, RegistryError> {
    Ok(
      self
        .workers()
        .await?
        .into_iter()
        .filter_map(|w| w.load().map(|load| (w.hostname, load)))
        .collect(),
    )
  }

  /// Finds a worker by id, falling back to a host name match.
  pub async fn resolve(&self, node: &str) -> Result<WorkerNode, RegistryError> {
    if let Some(raw) = self.registry.get(&worker_key(node)).await? {
      if let Ok(worker) = serde_json::from_slice::<WorkerNode>(&raw) {
        return Ok(worker);
      }
    }
    self
      .workers()
      .await?
      .into_iter()
      .find(|w| w.hostname == node)
      .ok_or_else(|| RegistryError::WorkerNotFound(node.to_string()))
  }
}
