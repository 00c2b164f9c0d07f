use std::sync::Arc;

use jobd::forwarder::Envelope;
use jobd::routes::routes;
use jobd::service::JobService;
use jobd::store::{MemoryTaskStore, TaskStore};
use jobd::supervisor::ProcessSupervisor;
use serde_json::{Value, json};
use tempfile::TempDir;
use warp::http::StatusCode;

const NODE: &str = "alpha";

struct Harness {
  store: Arc<MemoryTaskStore>,
  dir: TempDir,
  service: Arc<JobService>,
}

impl Harness {
  fn new() -> Self {
    let store = Arc::new(MemoryTaskStore::new());
    let service = Arc::new(JobService::new(store.clone(), Arc::new(ProcessSupervisor::new(NODE)), None));
    Self { store, dir: TempDir::new().unwrap(), service }
  }

  fn file(&self, name: &str) -> String {
    self.dir.path().join(name).to_string_lossy().into_owned()
  }

  fn sleep_job(&self) -> Value {
    json!({
      "doOnce": false,
      "run": {"cmd": "/bin/sleep", "args": ["30"], "outfile": self.file("out.log"), "errfile": self.file("err.log")}
    })
  }

  async fn call(&self, method: &str, path: &str, body: Option<&Value>) -> Envelope {
    let mut req = warp::test::request().method(method).path(path);
    if let Some(body) = body {
      req = req.json(body);
    }
    let res = req.reply(&routes(self.service.clone())).await;
    assert_eq!(res.status(), StatusCode::OK, "{method} {path}");
    serde_json::from_slice(res.body()).unwrap()
  }
}

#[tokio::test]
async fn long_running_job_lifecycle() {
  let h = Harness::new();

  let submitted = h.call("POST", "/v1/jobs/submit", Some(&h.sleep_job())).await;
  assert_eq!(submitted.code, 200, "{}", submitted.message);
  let job_id = submitted.data["id"].as_str().unwrap().to_string();
  let pid = submitted.data["pid"].as_i64().unwrap();
  assert!(pid > 0);
  assert!(submitted.data["ctime"].as_str().is_some());
  assert_eq!(submitted.data["run"]["cmd"], "/bin/sleep");

  let info = h.call("GET", &format!("/v1/jobs/{job_id}"), None).await;
  assert_eq!(info.code, 200);
  assert_eq!(info.data["node"], NODE);
  assert_eq!(info.data["pid"], pid);

  let listed = h.call("GET", "/v1/jobs?start=0&limit=10", None).await;
  assert_eq!(listed.data.as_array().unwrap().len(), 1);

  let report = h.call("POST", &format!("/v1/agent/tasks/report?token={NODE}:{job_id}&pid={pid}"), None).await;
  assert_eq!(report.code, 200, "{}", report.message);

  let by_body = h
    .call("POST", "/v1/agent/tasks/report", Some(&json!({"token": format!("{NODE}:{job_id}"), "pid": pid})))
    .await;
  assert_eq!(by_body.code, 200);

  let stopped = h.call("PUT", &format!("/v1/jobs/{job_id}/stop"), None).await;
  assert_eq!(stopped.code, 200, "{}", stopped.message);
  assert!(h.store.all().await.is_empty());

  let again = h.call("PUT", &format!("/v1/jobs/{job_id}/stop"), None).await;
  assert_eq!(again.code, 1002);
}

#[tokio::test]
async fn report_errors_are_reported_by_code() {
  let h = Harness::new();
  let submitted = h.call("POST", "/v1/jobs/submit", Some(&h.sleep_job())).await;
  let job_id = submitted.data["id"].as_str().unwrap().to_string();
  let pid = submitted.data["pid"].as_i64().unwrap();

  let malformed = h.call("POST", "/v1/agent/tasks/report?token=nocolon&pid=1", None).await;
  assert_eq!(malformed.code, 1004);

  let foreign = h.call("POST", &format!("/v1/agent/tasks/report?token=beta:{job_id}&pid={pid}"), None).await;
  assert_eq!(foreign.code, 1006);

  let wrong_pid = h.call("POST", &format!("/v1/agent/tasks/report?token={NODE}:{job_id}&pid=1"), None).await;
  assert_eq!(wrong_pid.code, 2002);

  let wrong_job = h.call("POST", &format!("/v1/agent/tasks/report?token={NODE}:deadbeef&pid={pid}"), None).await;
  assert_eq!(wrong_job.code, 2002);

  let stopped = h.call("POST", &format!("/v1/jobs/{job_id}/stop"), None).await;
  assert_eq!(stopped.code, 200);
}

#[tokio::test]
async fn invalid_submissions_are_parameter_errors() {
  let h = Harness::new();

  let missing_errfile = json!({"run": {"cmd": "/bin/sleep", "outfile": h.file("o"), "errfile": ""}});
  assert_eq!(h.call("POST", "/v1/jobs/submit", Some(&missing_errfile)).await.code, 1004);

  let no_run = json!({"doOnce": true});
  assert_eq!(h.call("POST", "/v1/jobs/submit", Some(&no_run)).await.code, 1004);

  let missing_binary = json!({"run": {"cmd": "/nonexistent/binary", "outfile": h.file("o"), "errfile": h.file("e")}});
  assert_eq!(h.call("POST", "/v1/jobs/submit", Some(&missing_binary)).await.code, 1001);

  assert!(h.store.all().await.is_empty());
}

#[tokio::test]
async fn run_once_job_is_not_persisted() {
  let h = Harness::new();
  let job = json!({"doOnce": true, "run": {"cmd": "/bin/true", "outfile": h.file("o"), "errfile": h.file("e")}});

  let done = h.call("POST", "/v1/jobs/submit", Some(&job)).await;
  assert_eq!(done.code, 200, "{}", done.message);
  assert!(h.store.all().await.is_empty());
}

#[tokio::test]
async fn singleton_job_runs_once_at_a_time() {
  let h = Harness::new();
  let job = json!({
    "doOnce": true,
    "bigOne": "nightly",
    "run": {"cmd": "/bin/sleep", "args": ["30"], "outfile": h.file("o"), "errfile": h.file("e")}
  });

  let first = h.call("POST", "/v1/jobs/submit", Some(&job)).await;
  assert_eq!(first.code, 200, "{}", first.message);
  let job_id = first.data["id"].as_str().unwrap().to_string();

  let second = h.call("POST", "/v1/jobs/submit", Some(&job)).await;
  assert_eq!(second.code, 1009);

  let stored = h.store.find_big_one("nightly").await.unwrap().unwrap();
  assert!(stored.do_once);
  assert_eq!(h.store.count_tasks_for_node(NODE).await.unwrap(), 0);

  let stopped = h.call("POST", "/v1/jobs/stopBigOne", Some(&json!({"bigOneJobId": job_id}))).await;
  assert_eq!(stopped.code, 200, "{}", stopped.message);
  assert!(h.store.find_big_one("nightly").await.unwrap().is_none());

  let unknown = h.call("POST", "/v1/jobs/stopBigOne", Some(&json!({"bigOneJobId": "missing"}))).await;
  assert_eq!(unknown.code, 200);

  let again = h.call("POST", "/v1/jobs/submit", Some(&job)).await;
  assert_eq!(again.code, 200);
  let again_id = again.data["id"].as_str().unwrap().to_string();
  let plain_stop = h.call("PUT", &format!("/v1/jobs/{again_id}/stop"), None).await;
  assert_eq!(plain_stop.code, 200);
}

#[tokio::test]
async fn unknown_job_info_is_not_found() {
  let h = Harness::new();
  assert_eq!(h.call("GET", "/v1/jobs/nope", None).await.code, 1002);
}

#[tokio::test]
async fn submission_pinned_to_another_node_is_refused() {
  let h = Harness::new();
  let mut job = h.sleep_job();
  job["node"] = json!("beta");

  let refused = h.call("POST", "/v1/jobs/submit", Some(&job)).await;
  assert_eq!(refused.code, 1006);
  assert!(h.store.all().await.is_empty());

  job["node"] = json!(NODE);
  let local = h.call("POST", "/v1/jobs/submit", Some(&job)).await;
  assert_eq!(local.code, 200, "{}", local.message);
  let job_id = local.data["id"].as_str().unwrap().to_string();
  assert_eq!(h.call("PUT", &format!("/v1/jobs/{job_id}/stop"), None).await.code, 200);
}

#[tokio::test]
async fn unknown_route_is_not_a_missing_job() {
  let h = Harness::new();
  let res = warp::test::request()
    .method("GET")
    .path("/v1/nowhere/at/all")
    .reply(&routes(h.service.clone()))
    .await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
  let body: Envelope = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(body.code, 1004);
  assert_ne!(body.message, "job id not found");
}
