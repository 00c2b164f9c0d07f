use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jobd::{
  config::Config,
  database::setup_database,
  forwarder::Forwarder,
  host,
  load_reader::LoadReader,
  membership::{MemberIdentity, Membership},
  reconciler::Reconciler,
  registry::{EtcdRegistry, Registry},
  routes::routes,
  sampler::{ResourceSampler, SysinfoProbe},
  service::{Cluster, JobService},
  shutdown::install_shutdown_handler,
  store::{PgTaskStore, TaskStore},
  supervisor::ProcessSupervisor,
};

#[tokio::main]
async fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::from_env()?;
  let node = match &config.node_name {
    Some(name) => name.clone(),
    None => host::hostname()?,
  };
  info!(%node, single_mode = config.single_mode, "Starting jobd");

  let cancel = install_shutdown_handler();
  let pool = setup_database(&config.database_url).await?;
  let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool));
  let supervisor = Arc::new(ProcessSupervisor::new(node.clone()));

  let mut background = Vec::new();
  let cluster = if config.single_mode {
    None
  } else {
    let registry: Arc<dyn Registry> = Arc::new(EtcdRegistry::connect(&config.etcd_endpoints).await?);
    let ip = match &config.advertise_ip {
      Some(ip) => ip.clone(),
      None => host::local_ipv4()?.to_string(),
    };
    let identity = MemberIdentity {
      id: config.worker_id.clone(),
      hostname: node.clone(),
      ip,
      port: config.server_port,
    };
    let sampler = ResourceSampler::new(node.clone(), store.clone(), Arc::new(SysinfoProbe::new()));
    let membership = Arc::new(Membership::new(
      identity,
      registry.clone(),
      sampler,
      config.heartbeat_interval,
      config.lease_ttl,
    ));
    background.push(
      membership
        .register(cancel.clone())
        .await
        .context("failed to register worker")?,
    );

    Some(Cluster {
      membership,
      reader: LoadReader::new(registry, config.lease_ttl),
      forwarder: Forwarder::new()?,
      strategy: config.schedule,
    })
  };

  let reconciler = Reconciler::new(node.clone(), store.clone(), supervisor.clone(), config.reconcile_interval);
  let reconcile_cancel = cancel.clone();
  background.push(tokio::spawn(async move { reconciler.run(reconcile_cancel).await }));

  let service = Arc::new(JobService::new(store, supervisor, cluster));
  let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
  let shutdown = cancel.clone();
  let (bound, server) = warp::serve(routes(service))
    .try_bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await })
    .with_context(|| format!("failed to bind {addr}"))?;
  info!(%bound, "Listening");
  server.await;

  cancel.cancel();
  for handle in background {
    if let Err(e) = handle.await {
      warn!(error = %e, "Background task ended abnormally");
    }
  }
  info!("jobd stopped");
  Ok(())
}
