use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("registry request failed: {0}")]
  Etcd(#[from] Box<etcd_client::Error>),

  #[error("registry document is invalid: {0}")]
  Json(#[from] serde_json::Error),

  #[error("worker not found: {0}")]
  WorkerNotFound(String),
}

impl From<etcd_client::Error> for RegistryError {
  fn from(e: etcd_client::Error) -> Self {
    RegistryError::Etcd(Box::new(e))
  }
}

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("failed to open output file {path}: {source}")]
  OutputFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to spawn {cmd}: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to run {cmd}: {source}")]
  Wait {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{cmd} did not finish within {secs}s")]
  Timeout { cmd: String, secs: u64 },

  #[error("{cmd} exited unsuccessfully: {status}")]
  Failed { cmd: String, status: std::process::ExitStatus },
}

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("task with job id {0} already exists")]
  Duplicate(String),
}

#[derive(Error, Debug)]
pub enum ForwardError {
  #[error("forward transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("remote error: {message}")]
  Remote { code: i32, message: String },
}

#[derive(Error, Debug)]
pub enum SampleError {
  #[error("no cpu information available")]
  NoCpu,

  #[error("no memory information available")]
  NoMemory,

  #[error("failed to count local tasks: {0}")]
  TaskCount(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ScheduleError {
  #[error("no available worker")]
  NoWorker,

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Outcome codes returned to API callers. Business failures (unknown job,
/// bad parameters) are distinct from infrastructure failures (storage, no
/// worker, internal) so callers can tell whether a retry makes sense.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
  #[error("failed to start job, check the start command")]
  StartJobFail,

  #[error("job id not found")]
  JobNotFound,

  #[error("failed to stop job, please retry")]
  StopJobFail,

  #[error("invalid request parameters: {0}")]
  BadRequest(String),

  #[error("internal server error")]
  Internal,

  #[error("host name {0} does not belong to this node")]
  NotThisNode(String),

  #[error("job execution timed out")]
  JobTimeout,

  #[error("forwarding failed: {0}")]
  Forward(String),

  /// Non-success envelope from the node the request was relayed to.
  #[error("{message}")]
  Remote { code: i32, message: String },

  #[error("singleton job {0} is already running")]
  BigOneRunning(String),

  #[error("storage error")]
  Storage,

  #[error("no available worker")]
  NoWorker,

  #[error("record does not exist")]
  RecordNotFound,
}

impl ServiceError {
  pub fn code(&self) -> i32 {
    match self {
      ServiceError::StartJobFail => 1001,
      ServiceError::JobNotFound => 1002,
      ServiceError::StopJobFail => 1003,
      ServiceError::BadRequest(_) => 1004,
      ServiceError::Internal => 1005,
      ServiceError::NotThisNode(_) => 1006,
      ServiceError::JobTimeout => 1007,
      ServiceError::Forward(_) => 1008,
      ServiceError::Remote { code, .. } => *code,
      ServiceError::BigOneRunning(_) => 1009,
      ServiceError::Storage => 2000,
      ServiceError::NoWorker => 2001,
      ServiceError::RecordNotFound => 2002,
    }
  }
}

impl From<StoreError> for ServiceError {
  fn from(e: StoreError) -> Self {
    tracing::error!(error = %e, "Task store failure");
    ServiceError::Storage
  }
}

impl From<ForwardError> for ServiceError {
  fn from(e: ForwardError) -> Self {
    tracing::error!(error = %e, "Forward request failed");
    match e {
      ForwardError::Remote { code, message } => ServiceError::Remote { code, message },
      ForwardError::Transport(e) => ServiceError::Forward(e.to_string()),
    }
  }
}

impl From<ScheduleError> for ServiceError {
  fn from(e: ScheduleError) -> Self {
    match e {
      ScheduleError::NoWorker => ServiceError::NoWorker,
      ScheduleError::Store(e) => e.into(),
      ScheduleError::Registry(e) => {
        tracing::error!(error = %e, "Registry failure while scheduling");
        ServiceError::Internal
      }
    }
  }
}
