use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions};
use tokio::sync::RwLock;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;

use crate::error::RegistryError;
use crate::registry::Registry;

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

/// etcd-backed registry. Keys look like `/workers/<worker id>`.
#[derive(Clone)]
pub struct EtcdRegistry {
  client: Arc<RwLock<Client>>,
}

impl EtcdRegistry {
  pub async fn connect(endpoints: &[String]) -> Result<Self, RegistryError> {
    let client = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
      let options = ConnectOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(5));
      Client::connect(endpoints, Some(options))
    })
      .await?;
    info!(?endpoints, "Connected to etcd");
    Ok(Self {
      client: Arc::new(RwLock::new(client)),
    })
  }
}

#[async_trait]
impl Registry for EtcdRegistry {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError> {
    let mut client = self.client.write().await;
    let resp = client.get(key, None).await?;
    Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
  }

  async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), RegistryError> {
    let mut client = self.client.write().await;
    let options = match ttl {
      Some(ttl) => {
        let lease = client.lease_grant(ttl.as_secs().max(1) as i64, None).await?;
        PutOptions::new().with_lease(lease.id())
      }
      None => PutOptions::new(),
    };
    client.put(key, value, Some(options)).await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), RegistryError> {
    let mut client = self.client.write().await;
    client.delete(key, None).await?;
    Ok(())
  }

  async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, RegistryError> {
    let mut client = self.client.write().await;
    let resp = client.get(prefix, Some(GetOptions::new().with_prefix())).await?;
    Ok(
      resp
        .kvs()
        .iter()
        .map(|kv| (String::from_utf8_lossy(kv.key()).into_owned(), kv.value().to_vec()))
        .collect(),
    )
  }
}
