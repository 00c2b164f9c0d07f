use std::convert::Infallible;
use std::sync::Arc;

use warp::Filter;

use crate::models::JobReporter;
use crate::routes::reply::envelope;
use crate::routes::{BODY_LIMIT, with_service};
use crate::service::JobService;

/// Children report with `token` and `pid` either in the query string or as a
/// JSON body.
pub fn report_route(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let reporter = warp::query::<JobReporter>().or(
    warp::body::content_length_limit(BODY_LIMIT).and(warp::body::json::<JobReporter>()),
  );

  warp::path!("v1" / "agent" / "tasks" / "report")
    .and(warp::post())
    .and(reporter.unify())
    .and(with_service(service))
    .and_then(handle_report)
}

async fn handle_report(report: JobReporter, service: Arc<JobService>) -> Result<impl warp::Reply, Infallible> {
  Ok(envelope(service.report(report).await))
}
