use std::net::{SocketAddr, TcpListener};

use jobd::error::{ForwardError, ServiceError};
use jobd::forwarder::Forwarder;
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use warp::Filter;

fn serve(reply: Value) -> SocketAddr {
  let route = warp::path!("v1" / "jobs" / "submit")
    .and(warp::post())
    .and(warp::body::json::<Value>())
    .map(move |_body: Value| warp::reply::json(&reply));
  let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  addr
}

#[tokio::test]
async fn success_envelope_yields_data() {
  let addr = serve(json!({"code": 200, "message": "success", "data": {"pid": 77, "id": "abc"}}));
  let forwarder = Forwarder::new().unwrap();

  let data = assert_ok!(forwarder.forward(&addr.to_string(), "/v1/jobs/submit", &json!({"doOnce": false})).await);
  assert_eq!(data, json!({"pid": 77, "id": "abc"}));
}

#[tokio::test]
async fn remote_failure_keeps_code_and_message() {
  let addr = serve(json!({"code": 500, "message": "boom"}));
  let forwarder = Forwarder::new().unwrap();

  let err = assert_err!(forwarder.forward(&addr.to_string(), "/v1/jobs/submit", &json!({})).await);
  assert!(err.to_string().contains("boom"));
  assert!(matches!(&err, ForwardError::Remote { code: 500, .. }));

  let relayed = ServiceError::from(err);
  assert_eq!(relayed.code(), 500);
  assert_eq!(relayed.to_string(), "boom");
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
  let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
  let forwarder = Forwarder::new().unwrap();

  let err = assert_err!(forwarder.forward(&format!("127.0.0.1:{port}"), "/v1/jobs/submit", &json!({})).await);
  assert!(matches!(err, ForwardError::Transport(_)));
  assert_eq!(ServiceError::from(err).code(), 1008);
}
