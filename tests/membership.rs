use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobd::error::SampleError;
use jobd::load_reader::LoadReader;
use jobd::membership::{MemberIdentity, Membership};
use jobd::models::{NewTask, ResourceInfo, WorkerNode};
use jobd::registry::{MemoryRegistry, Registry, worker_key};
use jobd::sampler::{HostLoad, HostProbe, ResourceSampler};
use jobd::scheduler::{Strategy, select_node};
use jobd::store::{MemoryTaskStore, TaskStore};
use tokio_util::sync::CancellationToken;

const HEARTBEAT: Duration = Duration::from_secs(20);
const LEASE: Duration = Duration::from_secs(60);

struct FixedProbe(HostLoad);

#[async_trait]
impl HostProbe for FixedProbe {
  async fn probe(&self) -> Result<HostLoad, SampleError> {
    Ok(self.0)
  }
}

struct BrokenProbe;

#[async_trait]
impl HostProbe for BrokenProbe {
  async fn probe(&self) -> Result<HostLoad, SampleError> {
    Err(SampleError::NoMemory)
  }
}

// Succeeds until `fail` is set.
struct FlakyProbe {
  load: HostLoad,
  fail: AtomicBool,
}

#[async_trait]
impl HostProbe for FlakyProbe {
  async fn probe(&self) -> Result<HostLoad, SampleError> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(SampleError::NoCpu);
    }
    Ok(self.load)
  }
}

fn identity(id: &str, hostname: &str, last_octet: u8) -> MemberIdentity {
  MemberIdentity {
    id: id.into(),
    hostname: hostname.into(),
    ip: format!("10.0.0.{last_octet}"),
    port: 9900,
  }
}

fn long_running(job_id: &str, node: &str) -> NewTask {
  NewTask {
    job_id: job_id.into(),
    node: node.into(),
    pid: 4242,
    cmd: "/bin/sleep".into(),
    args: vec!["30".into()],
    outfile: "/dev/null".into(),
    errfile: "/dev/null".into(),
    dc: String::new(),
    ip: String::new(),
    big_one: String::new(),
    load_method: String::new(),
    do_once: false,
  }
}

fn member(
  registry: &Arc<dyn Registry>,
  store: Arc<MemoryTaskStore>,
  identity: MemberIdentity,
  probe: Arc<dyn HostProbe>,
) -> Arc<Membership> {
  let sampler = ResourceSampler::new(identity.hostname.clone(), store, probe);
  Arc::new(Membership::new(identity, registry.clone(), sampler, HEARTBEAT, LEASE))
}

#[tokio::test]
async fn published_heartbeat_is_read_back_unchanged() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  let store = Arc::new(MemoryTaskStore::new());
  store.create_task(long_running("j1", "alpha")).await.unwrap();
  store.create_task(long_running("j2", "alpha")).await.unwrap();
  store.create_task(long_running("j3", "beta")).await.unwrap();

  let probe = Arc::new(FixedProbe(HostLoad { cpu_usage: 12.5, memory_usage: 40.0, load5: 0.75 }));
  let membership = member(&registry, store, identity("w1", "alpha", 1), probe);
  let cancel = CancellationToken::new();
  let handle = membership.register(cancel.clone()).await.unwrap();

  let reader = LoadReader::new(registry.clone(), LEASE);
  let snapshot = reader.snapshot().await.unwrap();
  assert_eq!(snapshot.len(), 1);
  assert_eq!(
    snapshot["alpha"],
    ResourceInfo { cpu_usage: 12.5, memory_usage: 40.0, load_usage: 0.75, task_count: 2 }
  );
  assert_eq!(membership.get_task_count().await, 2);

  let worker = reader.resolve("w1").await.unwrap();
  assert_eq!(worker.address(), "10.0.0.1:9900");
  assert_eq!(reader.resolve("alpha").await.unwrap().id, "w1");

  cancel.cancel();
  handle.await.unwrap();
  assert!(registry.get(&worker_key("w1")).await.unwrap().is_none());
  assert!(reader.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_sample_publishes_task_count_only() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  let membership = member(&registry, Arc::new(MemoryTaskStore::new()), identity("w2", "beta", 2), Arc::new(BrokenProbe));

  for _ in 0..3 {
    membership.increment_task_count().await;
  }
  membership.decrement_task_count().await;
  membership.heartbeat().await.unwrap();

  let raw = registry.get(&worker_key("w2")).await.unwrap().unwrap();
  let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
  assert_eq!(doc["taskCount"], 2);
  assert!(doc.get("resources").is_none());

  let snapshot = LoadReader::new(registry, LEASE).snapshot().await.unwrap();
  assert_eq!(snapshot["beta"], ResourceInfo::unsampled(2));
  assert!(!snapshot["beta"].is_sampled());
}

#[tokio::test]
async fn counter_never_goes_negative() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  let membership = member(&registry, Arc::new(MemoryTaskStore::new()), identity("w3", "gamma", 3), Arc::new(BrokenProbe));
  membership.decrement_task_count().await;
  membership.decrement_task_count().await;
  assert_eq!(membership.get_task_count().await, 0);
}

#[tokio::test]
async fn reader_skips_malformed_and_stale_entries() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  registry.put(&worker_key("garbage"), b"{not json".to_vec(), None).await.unwrap();

  let stale = WorkerNode {
    id: "old".into(),
    hostname: "old-host".into(),
    ip: "10.0.0.9".into(),
    port: 9900,
    status: "active".into(),
    last_beat: Utc::now() - chrono::Duration::minutes(10),
    resources: None,
    task_count: Some(0),
  };
  registry.put(&worker_key("old"), serde_json::to_vec(&stale).unwrap(), None).await.unwrap();

  let membership = member(&registry, Arc::new(MemoryTaskStore::new()), identity("w4", "delta", 4), Arc::new(BrokenProbe));
  membership.heartbeat().await.unwrap();

  let snapshot = LoadReader::new(registry, LEASE).snapshot().await.unwrap();
  assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["delta"]);
}

#[tokio::test]
async fn registration_adopts_previous_entry() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  let previous = WorkerNode {
    id: "w5".into(),
    hostname: "epsilon".into(),
    ip: "10.0.0.5".into(),
    port: 9900,
    status: "active".into(),
    last_beat: Utc::now(),
    resources: None,
    task_count: Some(7),
  };
  registry.put(&worker_key("w5"), serde_json::to_vec(&previous).unwrap(), None).await.unwrap();

  let membership = member(&registry, Arc::new(MemoryTaskStore::new()), identity("w5", "epsilon", 5), Arc::new(BrokenProbe));
  let cancel = CancellationToken::new();
  let handle = membership.register(cancel.clone()).await.unwrap();
  assert_eq!(membership.get_task_count().await, 7);

  cancel.cancel();
  handle.await.unwrap();
}

#[tokio::test]
async fn scheduler_picks_least_loaded_member() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  let store = Arc::new(MemoryTaskStore::new());
  for (i, node) in ["a", "a", "a", "a", "a", "b", "b", "c", "c", "c", "c", "c", "c", "c", "c", "c"].iter().enumerate() {
    store.create_task(long_running(&format!("job-{i}"), node)).await.unwrap();
  }

  let loads = [("a", 10.0, 20.0), ("b", 90.0, 80.0), ("c", 50.0, 50.0)];
  for (n, (host, cpu, mem)) in loads.iter().enumerate() {
    let probe = Arc::new(FixedProbe(HostLoad { cpu_usage: *cpu, memory_usage: *mem, load5: 1.0 }));
    let membership = member(&registry, store.clone(), identity(&format!("w-{host}"), host, n as u8 + 10), probe);
    membership.heartbeat().await.unwrap();
  }

  let snapshot = LoadReader::new(registry, LEASE).snapshot().await.unwrap();
  assert_eq!(select_node(&snapshot, Strategy::TaskCount).as_deref(), Some("b"));
  assert_eq!(select_node(&snapshot, Strategy::CpuUsage).as_deref(), Some("a"));
  assert_eq!(select_node(&snapshot, Strategy::MemUsage).as_deref(), Some("a"));
}

#[tokio::test]
async fn failed_sample_keeps_last_full_snapshot() {
  let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
  let store = Arc::new(MemoryTaskStore::new());
  store.create_task(long_running("j1", "alpha")).await.unwrap();
  store.create_task(long_running("j2", "alpha")).await.unwrap();

  let probe = Arc::new(FlakyProbe {
    load: HostLoad { cpu_usage: 5.0, memory_usage: 30.0, load5: 0.5 },
    fail: AtomicBool::new(false),
  });
  let membership = member(&registry, store, identity("wa", "alpha", 20), probe.clone());
  membership.heartbeat().await.unwrap();
  let reader = LoadReader::new(registry.clone(), LEASE);
  let first_beat = reader.resolve("wa").await.unwrap().last_beat;

  probe.fail.store(true, Ordering::SeqCst);
  membership.increment_task_count().await;
  tokio::time::sleep(Duration::from_millis(10)).await;
  membership.heartbeat().await.unwrap();

  let worker = reader.resolve("wa").await.unwrap();
  assert!(worker.last_beat > first_beat);
  assert!(worker.resources.is_some());
  let snapshot = reader.snapshot().await.unwrap();
  assert_eq!(
    snapshot["alpha"],
    ResourceInfo { cpu_usage: 5.0, memory_usage: 30.0, load_usage: 0.5, task_count: 3 }
  );
  assert_eq!(select_node(&snapshot, Strategy::CpuUsage).as_deref(), Some("alpha"));
}
