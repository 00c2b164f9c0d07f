use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::StoreError;
use crate::models::{NewTask, Task};
use crate::store::TaskStore;

const TASK_COLUMNS: &str = "id, job_id, node, pid, cmd, args, outfile, errfile, dc, ip, big_one, \
  load_method, do_once, heart_beat_time, create_time, update_time";

#[derive(Debug, Clone)]
pub struct PgTaskStore {
  pool: Pool<Postgres>,
}

impl PgTaskStore {
  pub fn new(pool: Pool<Postgres>) -> Self {
    Self { pool }
  }

  /// Every task in the cluster, newest first.
  pub async fn list_recent(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id DESC LIMIT $1");
    Ok(sqlx::query_as::<_, Task>(&sql).bind(limit).fetch_all(&self.pool).await?)
  }
}

#[async_trait]
impl TaskStore for PgTaskStore {
  async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
    let sql = format!(
      "INSERT INTO tasks (job_id, node, pid, cmd, args, outfile, errfile, dc, ip, big_one, load_method, do_once,
         heart_beat_time, create_time, update_time)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW(), NOW())
       RETURNING {TASK_COLUMNS}"
    );
    sqlx::query_as::<_, Task>(&sql)
      .bind(&task.job_id)
      .bind(&task.node)
      .bind(task.pid)
      .bind(&task.cmd)
      .bind(&task.args)
      .bind(&task.outfile)
      .bind(&task.errfile)
      .bind(&task.dc)
      .bind(&task.ip)
      .bind(&task.big_one)
      .bind(&task.load_method)
      .bind(task.do_once)
      .fetch_one(&self.pool)
      .await
      .map_err(|e| match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate(task.job_id.clone()),
        _ => StoreError::Database(e),
      })
  }

  async fn delete_task_by_job_id(&self, job_id: &str) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM tasks WHERE job_id = $1")
      .bind(job_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected())
  }

  async fn find_task_by_job_id(&self, job_id: &str) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = $1");
    Ok(sqlx::query_as::<_, Task>(&sql).bind(job_id).fetch_optional(&self.pool).await?)
  }

  async fn find_task_by_node_and_pid(&self, node: &str, pid: i32) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE node = $1 AND pid = $2 ORDER BY id DESC LIMIT 1");
    Ok(
      sqlx::query_as::<_, Task>(&sql)
        .bind(node)
        .bind(pid)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn find_big_one(&self, name: &str) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE big_one = $1 AND big_one <> '' LIMIT 1");
    Ok(sqlx::query_as::<_, Task>(&sql).bind(name).fetch_optional(&self.pool).await?)
  }

  async fn get_max_task_id(&self, node: &str) -> Result<Option<i64>, StoreError> {
    Ok(
      sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM tasks WHERE node = $1 AND do_once = FALSE")
        .bind(node)
        .fetch_one(&self.pool)
        .await?,
    )
  }

  async fn get_min_task_id(&self, node: &str) -> Result<Option<i64>, StoreError> {
    Ok(
      sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(id) FROM tasks WHERE node = $1 AND do_once = FALSE")
        .bind(node)
        .fetch_one(&self.pool)
        .await?,
    )
  }

  async fn list_tasks(&self, start_id: i64, batch_size: i64, node: &str) -> Result<Vec<Task>, StoreError> {
    let sql = format!(
      "SELECT {TASK_COLUMNS} FROM tasks WHERE id >= $1 AND node = $2 AND do_once = FALSE ORDER BY id LIMIT $3"
    );
    Ok(
      sqlx::query_as::<_, Task>(&sql)
        .bind(start_id)
        .bind(node)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?,
    )
  }

  async fn update_heartbeat(&self, id: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE tasks SET heart_beat_time = NOW(), update_time = NOW() WHERE id = $1")
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn update_pid(&self, id: i64, pid: i32) -> Result<(), StoreError> {
    sqlx::query("UPDATE tasks SET pid = $1, heart_beat_time = NOW(), update_time = NOW() WHERE id = $2")
      .bind(pid)
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn count_tasks_by_node(&self) -> Result<HashMap<String, i64>, StoreError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
      "SELECT node, COUNT(*) FROM tasks WHERE do_once = FALSE GROUP BY node",
    )
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.into_iter().collect())
  }

  async fn count_tasks_for_node(&self, node: &str) -> Result<i64, StoreError> {
    Ok(
      sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE node = $1 AND do_once = FALSE")
        .bind(node)
        .fetch_one(&self.pool)
        .await?,
    )
  }
}
