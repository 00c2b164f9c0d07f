use serde::{Serialize, Deserialize, Deserializer};
use chrono::{DateTime, Duration, Utc};

/// Persisted unit of scheduled work. `node` is fixed when the row is created.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
  pub id: i64,
  pub job_id: String,
  pub node: String,
  pub pid: i32,
  pub cmd: String,
  pub args: Vec<String>,
  pub outfile: String,
  pub errfile: String,
  pub dc: String,
  pub ip: String,
  pub big_one: String,
  pub load_method: String,
  pub do_once: bool,
  pub heart_beat_time: DateTime<Utc>,
  pub create_time: DateTime<Utc>,
  pub update_time: DateTime<Utc>,
}

impl Task {
  pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
    now - self.heart_beat_time > threshold
  }

  pub fn is_big_one(&self) -> bool {
    !self.big_one.is_empty()
  }
}

#[derive(Debug, Clone)]
pub struct NewTask {
  pub job_id: String,
  pub node: String,
  pub pid: i32,
  pub cmd: String,
  pub args: Vec<String>,
  pub outfile: String,
  pub errfile: String,
  pub dc: String,
  pub ip: String,
  pub big_one: String,
  pub load_method: String,
  pub do_once: bool,
}

/// Resource snapshot published by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
  pub cpu_usage: f64,
  pub memory_usage: f64,
  pub load_usage: f64,
  #[serde(deserialize_with = "count_from_number")]
  pub task_count: i64,
}

impl ResourceInfo {
  /// Load known only by task count; the host metrics rank last.
  pub fn unsampled(task_count: i64) -> Self {
    Self {
      cpu_usage: f64::INFINITY,
      memory_usage: f64::INFINITY,
      load_usage: f64::INFINITY,
      task_count,
    }
  }

  pub fn is_sampled(&self) -> bool {
    self.cpu_usage.is_finite() && self.memory_usage.is_finite() && self.load_usage.is_finite()
  }
}

/// Registry document for one worker. Full heartbeats carry `resources`,
/// reduced heartbeats carry only a top-level `taskCount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNode {
  pub id: String,
  pub hostname: String,
  pub ip: String,
  pub port: u16,
  pub status: String,
  pub last_beat: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resources: Option<ResourceInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "optional_count_from_number")]
  pub task_count: Option<i64>,
}

impl WorkerNode {
  pub fn address(&self) -> String {
    format!("{}:{}", self.ip, self.port)
  }

  pub fn load(&self) -> Option<ResourceInfo> {
    self.resources.or_else(|| self.task_count.map(ResourceInfo::unsampled))
  }
}

// Task counts may be written as integers or floats depending on the writer.
fn count_from_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(f64::deserialize(deserializer)?.round() as i64)
}

fn optional_count_from_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<f64>::deserialize(deserializer)?.map(|v| v.round() as i64))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
  pub cmd: String,
  #[serde(default)]
  pub args: Vec<String>,
  pub outfile: String,
  pub errfile: String,
}

/// Submission payload. Forwarded verbatim when another node is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCfg {
  #[serde(default)]
  pub do_once: bool,
  pub run: JobRun,
  #[serde(default)]
  pub node: String,
  #[serde(default)]
  pub dc: String,
  #[serde(default)]
  pub ip: String,
  #[serde(default)]
  pub load_method: String,
  #[serde(default)]
  pub big_one: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigOne {
  pub big_one_job_id: String,
}

/// Heartbeat self-report from a supervised child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReporter {
  pub token: String,
  pub pid: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
  #[serde(default)]
  pub start: i64,
  #[serde(default = "default_list_limit")]
  pub limit: i64,
}

fn default_list_limit() -> i64 {
  100
}
