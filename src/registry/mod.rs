//! Shared key/value registry used for cluster membership. Accessed only
//! through stateless get/put/delete/prefix-scan calls.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RegistryError;

pub mod etcd;
pub mod memory;

pub use etcd::EtcdRegistry;
pub use memory::MemoryRegistry;

pub const WORKER_PREFIX: &str = "/workers/";

pub fn worker_key(worker_id: &str) -> String {
  format!("{WORKER_PREFIX}{worker_id}")
}

#[async_trait]
pub trait Registry: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError>;

  /// Writes `value`. With a `ttl` the entry is bound to a lease and disappears
  /// unless rewritten before it lapses.
  async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), RegistryError>;

  async fn delete(&self, key: &str) -> Result<(), RegistryError>;

  async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, RegistryError>;
}
