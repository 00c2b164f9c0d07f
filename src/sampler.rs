use std::sync::Arc;

use async_trait::async_trait;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, System};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::SampleError;
use crate::models::ResourceInfo;
use crate::store::TaskStore;

/// Host-level metrics, without the task count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostLoad {
  pub cpu_usage: f64,
  pub memory_usage: f64,
  pub load5: f64,
}

#[async_trait]
pub trait HostProbe: Send + Sync {
  async fn probe(&self) -> Result<HostLoad, SampleError>;
}

pub struct SysinfoProbe {
  system: Mutex<System>,
}

impl SysinfoProbe {
  pub fn new() -> Self {
    Self {
      system: Mutex::new(System::new()),
    }
  }
}

impl Default for SysinfoProbe {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl HostProbe for SysinfoProbe {
  async fn probe(&self) -> Result<HostLoad, SampleError> {
    let mut sys = self.system.lock().await;

    // CPU usage is a delta between two refreshes.
    sys.refresh_cpu();
    sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu();
    if sys.cpus().is_empty() {
      return Err(SampleError::NoCpu);
    }
    let cpu_usage = sys.global_cpu_info().cpu_usage() as f64;

    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
      return Err(SampleError::NoMemory);
    }
    let memory_usage = sys.used_memory() as f64 / total as f64 * 100.0;

    Ok(HostLoad {
      cpu_usage,
      memory_usage,
      load5: System::load_average().five,
    })
  }
}

/// Produces this node's resource snapshot. Either every part is sampled or the
/// whole sample fails.
pub struct ResourceSampler {
  node: String,
  store: Arc<dyn TaskStore>,
  probe: Arc<dyn HostProbe>,
}

impl ResourceSampler {
  pub fn new(node: impl Into<String>, store: Arc<dyn TaskStore>, probe: Arc<dyn HostProbe>) -> Self {
    Self {
      node: node.into(),
      store,
      probe,
    }
  }

  pub async fn sample(&self) -> Result<ResourceInfo, SampleError> {
    let host = self.probe.probe().await?;
    let task_count = self.store.count_tasks_for_node(&self.node).await?;
    Ok(ResourceInfo {
      cpu_usage: host.cpu_usage,
      memory_usage: host.memory_usage,
      load_usage: host.load5,
      task_count,
    })
  }
}
