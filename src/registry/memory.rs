use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::RegistryError;
use crate::registry::Registry;

/// Registry kept in process memory. Leases are honoured on read.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
  entries: RwLock<BTreeMap<String, Entry>>,
}

#[derive(Debug)]
struct Entry {
  value: Vec<u8>,
  expires_at: Option<Instant>,
}

impl Entry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.is_none_or(|at| at > now)
  }
}

impl MemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Registry for MemoryRegistry {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError> {
    let now = Instant::now();
    Ok(
      self
        .entries
        .read()
        .await
        .get(key)
        .filter(|e| e.is_live(now))
        .map(|e| e.value.clone()),
    )
  }

  async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), RegistryError> {
    let expires_at = ttl.map(|ttl| Instant::now() + ttl);
    self.entries.write().await.insert(key.to_string(), Entry { value, expires_at });
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), RegistryError> {
    self.entries.write().await.remove(key);
    Ok(())
  }

  async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, RegistryError> {
    let now = Instant::now();
    Ok(
      self
        .entries
        .read()
        .await
        .iter()
        .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
        .map(|(k, e)| (k.clone(), e.value.clone()))
        .collect(),
    )
  }
}
