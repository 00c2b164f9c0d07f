//! Task persistence as seen by the daemon. Every call is its own atomic unit;
//! nothing here holds a transaction open across calls.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{NewTask, Task};

pub mod memory;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
  async fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

  /// Returns the number of rows removed.
  async fn delete_task_by_job_id(&self, job_id: &str) -> Result<u64, StoreError>;

  async fn find_task_by_job_id(&self, job_id: &str) -> Result<Option<Task>, StoreError>;

  async fn find_task_by_node_and_pid(&self, node: &str, pid: i32) -> Result<Option<Task>, StoreError>;

  /// Singleton task holding `name`, if any.
  async fn find_big_one(&self, name: &str) -> Result<Option<Task>, StoreError>;

  /// Largest id among the node's long-running tasks.
  async fn get_max_task_id(&self, node: &str) -> Result<Option<i64>, StoreError>;

  /// Smallest id among the node's long-running tasks.
  async fn get_min_task_id(&self, node: &str) -> Result<Option<i64>, StoreError>;

  /// Long-running tasks of `node` with `id >= start_id`, ascending by id.
  async fn list_tasks(&self, start_id: i64, batch_size: i64, node: &str) -> Result<Vec<Task>, StoreError>;

  async fn update_heartbeat(&self, id: i64) -> Result<(), StoreError>;

  /// Sets a new pid and refreshes the heartbeat.
  async fn update_pid(&self, id: i64, pid: i32) -> Result<(), StoreError>;

  /// Long-running task count per node.
  async fn count_tasks_by_node(&self) -> Result<HashMap<String, i64>, StoreError>;

  async fn count_tasks_for_node(&self, node: &str) -> Result<i64, StoreError>;
}
