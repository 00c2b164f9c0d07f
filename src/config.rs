use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::scheduler::Strategy;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub server_port: u16,
  pub single_mode: bool,
  pub etcd_endpoints: Vec<String>,
  pub worker_id: String,
  pub node_name: Option<String>,
  pub advertise_ip: Option<String>,
  pub schedule: Strategy,
  pub heartbeat_interval: Duration,
  pub lease_ttl: Duration,
  pub reconcile_interval: Duration,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let single_mode = env_flag("JOBD_SINGLE_MODE")?;
    let heartbeat_interval = Duration::from_secs(env_number("JOBD_HEARTBEAT_SECS", 20)?);
    let lease_default = heartbeat_interval.as_secs().saturating_mul(3).max(1);

    let config = Self {
      database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
      server_port: env_number("JOBD_SERVER_PORT", 9900)?,
      single_mode,
      etcd_endpoints: env::var("JOBD_ETCD_ENDPOINTS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect(),
      worker_id: env::var("JOBD_WORKER_ID").unwrap_or_default(),
      node_name: env::var("JOBD_NODE_NAME").ok().filter(|s| !s.is_empty()),
      advertise_ip: env::var("JOBD_ADVERTISE_IP").ok().filter(|s| !s.is_empty()),
      schedule: env::var("JOBD_SCHEDULE")
        .unwrap_or_else(|_| "taskCount".into())
        .parse()?,
      heartbeat_interval,
      lease_ttl: Duration::from_secs(env_number("JOBD_LEASE_TTL_SECS", lease_default)?),
      reconcile_interval: Duration::from_secs(env_number("JOBD_RECONCILE_SECS", 20)?),
    };

    if !config.single_mode && (config.worker_id.is_empty() || config.etcd_endpoints.is_empty()) {
      return Err(anyhow!("JOBD_WORKER_ID and JOBD_ETCD_ENDPOINTS are required in cluster mode"));
    }
    if config.heartbeat_interval.is_zero() || config.reconcile_interval.is_zero() {
      return Err(anyhow!("heartbeat and reconcile intervals must be positive"));
    }
    Ok(config)
  }
}

fn env_flag(key: &str) -> Result<bool> {
  match env::var(key) {
    Ok(v) => match v.to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" => Ok(true),
      "0" | "false" | "no" | "" => Ok(false),
      other => Err(anyhow!("{key} must be a boolean, got {other:?}")),
    },
    Err(_) => Ok(false),
  }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
  T: std::str::FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(key) {
    Ok(v) => v.parse().with_context(|| format!("{key} is not a valid number")),
    Err(_) => Ok(default),
  }
}
