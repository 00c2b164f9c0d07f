use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RegistryError;
use crate::models::{ResourceInfo, WorkerNode};
use crate::registry::{Registry, worker_key};
use crate::sampler::ResourceSampler;

pub const STATUS_ACTIVE: &str = "active";

/// Who this daemon is in the cluster.
#[derive(Debug, Clone)]
pub struct MemberIdentity {
  pub id: String,
  pub hostname: String,
  pub ip: String,
  pub port: u16,
}

/// Keeps this node's registry entry alive for the lifetime of the daemon.
pub struct Membership {
  identity: MemberIdentity,
  registry: Arc<dyn Registry>,
  sampler: ResourceSampler,
  heartbeat_interval: Duration,
  lease_ttl: Duration,
  task_count: Mutex<i64>,
  last_resources: Mutex<Option<ResourceInfo>>,
}

impl Membership {
  pub fn new(
    identity: MemberIdentity,
    registry: Arc<dyn Registry>,
    sampler: ResourceSampler,
    heartbeat_interval: Duration,
    lease_ttl: Duration,
  ) -> Self {
    Self {
      identity,
      registry,
      sampler,
      heartbeat_interval,
      lease_ttl,
      task_count: Mutex::new(0),
      last_resources: Mutex::new(None),
    }
  }

  pub fn identity(&self) -> &MemberIdentity {
    &self.identity
  }

  pub fn key(&self) -> String {
    worker_key(&self.identity.id)
  }

  /// Writes this node's entry and starts the heartbeat loop.
  ///
  /// An entry left behind by a previous instance is adopted: its task count
  /// seeds the counter and the entry is overwritten in place.
  pub async fn register(self: &Arc<Self>, cancel: CancellationToken) -> Result<JoinHandle<()>, RegistryError> {
    let key = self.key();
    if let Some(raw) = self.registry.get(&key).await? {
      match serde_json::from_slice::<WorkerNode>(&raw) {
        Ok(previous) => {
          let count = previous.load().map(|l| l.task_count).unwrap_or(0);
          *self.task_count.lock().await = count;
          info!(id = %self.identity.id, last_beat = %previous.last_beat, task_count = count,
            "Adopting existing worker registration");
        }
        Err(e) => warn!(id = %self.identity.id, error = %e, "Existing worker registration is unreadable, overwriting"),
      }
    }

    let document = self.next_document().await;
    self.write(&document).await?;
    info!(id = %self.identity.id, hostname = %self.identity.hostname, "Worker registered successfully");

    let this = Arc::clone(self);
    Ok(tokio::spawn(async move { this.heartbeat_loop(cancel).await }))
  }

  async fn heartbeat_loop(self: Arc<Self>, cancel: CancellationToken) {
    info!("Worker status update routine started");
    let mut ticker = interval(self.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(id = %self.identity.id, "Worker stopping, cleaning up registration");
          match self.registry.delete(&self.key()).await {
            Ok(()) => info!(id = %self.identity.id, "Worker registration cleaned up successfully"),
            Err(e) => error!(id = %self.identity.id, error = %e, "Failed to delete worker registration"),
          }
          return;
        }
        _ = ticker.tick() => {
          if let Err(e) = self.heartbeat().await {
            error!(id = %self.identity.id, error = %e, "Failed to update worker info");
          }
        }
      }
    }
  }

  /// One heartbeat write.
  pub async fn heartbeat(&self) -> Result<(), RegistryError> {
    let document = self.next_document().await;
    self.write(&document).await
  }

  // A failed sample republishes the last full snapshot under a fresh
  // lastBeat; the reduced document is used only before any sample succeeded.
  async fn next_document(&self) -> WorkerNode {
    match self.sampler.sample().await {
      Ok(resources) => {
        *self.task_count.lock().await = resources.task_count;
        *self.last_resources.lock().await = Some(resources);
        self.document(Some(resources), resources.task_count)
      }
      Err(e) => {
        let count = self.get_task_count().await;
        match *self.last_resources.lock().await {
          Some(previous) => {
            warn!(error = %e, "Failed to update resource info, republishing last snapshot");
            let resources = ResourceInfo { task_count: count, ..previous };
            self.document(Some(resources), count)
          }
          None => {
            warn!(error = %e, "Failed to update resource info, publishing task count only");
            self.document(None, count)
          }
        }
      }
    }
  }

  fn document(&self, resources: Option<ResourceInfo>, task_count: i64) -> WorkerNode {
    WorkerNode {
      id: self.identity.id.clone(),
      hostname: self.identity.hostname.clone(),
      ip: self.identity.ip.clone(),
      port: self.identity.port,
      status: STATUS_ACTIVE.to_string(),
      last_beat: Utc::now(),
      task_count: resources.is_none().then_some(task_count),
      resources,
    }
  }

  async fn write(&self, document: &WorkerNode) -> Result<(), RegistryError> {
    let data = serde_json::to_vec(document)?;
    self.registry.put(&self.key(), data, Some(self.lease_ttl)).await
  }

  pub async fn increment_task_count(&self) {
    *self.task_count.lock().await += 1;
  }

  pub async fn decrement_task_count(&self) {
    let mut count = self.task_count.lock().await;
    *count = (*count - 1).max(0);
  }

  pub async fn get_task_count(&self) -> i64 {
    *self.task_count.lock().await
  }
}
