use std::convert::Infallible;
use std::sync::Arc;

use warp::Filter;

use crate::service::JobService;

pub mod agent;
pub mod jobs;
pub mod reply;

pub(crate) const BODY_LIMIT: u64 = 64 * 1024;

pub fn routes(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
  jobs::job_routes(service.clone())
    .or(agent::report_route(service))
    .recover(reply::handle_rejection)
    .with(warp::trace::request())
}

pub fn with_service(service: Arc<JobService>) -> impl Filter<Extract = (Arc<JobService>,), Error = Infallible> + Clone {
  warp::any().map(move || service.clone())
}
