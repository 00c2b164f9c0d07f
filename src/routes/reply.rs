use std::convert::Infallible;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::error::ServiceError;
use crate::forwarder::{Envelope, SUCCESS_CODE};

/// Wraps a service outcome in the `{code, message, data}` envelope. The HTTP
/// status is always 200; callers branch on `code`.
pub fn envelope<T: Serialize>(result: Result<T, ServiceError>) -> warp::reply::Json {
  let body = match result.map(serde_json::to_value) {
    Ok(Ok(data)) => Envelope {
      code: SUCCESS_CODE,
      message: "success".into(),
      data,
    },
    Ok(Err(e)) => {
      error!(error = %e, "Failed to encode reply");
      failure(&ServiceError::Internal)
    }
    Err(e) => failure(&e),
  };
  warp::reply::json(&body)
}

fn failure(e: &ServiceError) -> Envelope {
  Envelope {
    code: e.code(),
    message: e.to_string(),
    data: Value::Null,
  }
}

/// Turns malformed requests into parameter errors; everything else keeps its
/// HTTP status.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  if err.is_not_found() {
    return Ok(warp::reply::with_status(warp::reply::json(&failure(&ServiceError::BadRequest("unknown route".into()))), StatusCode::NOT_FOUND));
  }

  let bad_request = if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    Some(e.to_string())
  } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
    Some(e.to_string())
  } else {
    None
  };
  if let Some(message) = bad_request {
    debug!(%message, "Rejected malformed request");
    return Ok(warp::reply::with_status(
      envelope::<()>(Err(ServiceError::BadRequest(message))),
      StatusCode::OK,
    ));
  }

  let status = if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    StatusCode::METHOD_NOT_ALLOWED
  } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
    StatusCode::PAYLOAD_TOO_LARGE
  } else {
    error!(?err, "Unhandled rejection");
    StatusCode::INTERNAL_SERVER_ERROR
  };
  Ok(warp::reply::with_status(envelope::<()>(Err(ServiceError::Internal)), status))
}
