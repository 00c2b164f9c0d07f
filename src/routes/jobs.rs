use std::convert::Infallible;
use std::sync::Arc;

use warp::Filter;

use crate::models::{BigOne, JobCfg, ListQuery};
use crate::routes::reply::envelope;
use crate::routes::{BODY_LIMIT, with_service};
use crate::service::JobService;

pub fn job_routes(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  submit_route(service.clone())
    .or(stop_big_one_route(service.clone()))
    .or(stop_route(service.clone()))
    .or(list_route(service.clone()))
    .or(info_route(service))
}

pub fn submit_route(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("v1" / "jobs" / "submit")
    .and(warp::post())
    .and(warp::body::content_length_limit(BODY_LIMIT))
    .and(warp::body::json())
    .and(with_service(service))
    .and_then(handle_submit)
}

pub fn stop_route(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("v1" / "jobs" / String / "stop")
    .and(warp::put().or(warp::post()).unify())
    .and(with_service(service))
    .and_then(handle_stop)
}

pub fn stop_big_one_route(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("v1" / "jobs" / "stopBigOne")
    .and(warp::post())
    .and(warp::body::content_length_limit(BODY_LIMIT))
    .and(warp::body::json())
    .and(with_service(service))
    .and_then(handle_stop_big_one)
}

pub fn list_route(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("v1" / "jobs")
    .and(warp::get())
    .and(warp::query::<ListQuery>())
    .and(with_service(service))
    .and_then(handle_list)
}

pub fn info_route(service: Arc<JobService>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("v1" / "jobs" / String)
    .and(warp::get())
    .and(with_service(service))
    .and_then(handle_info)
}

async fn handle_submit(req: JobCfg, service: Arc<JobService>) -> Result<impl warp::Reply, Infallible> {
  Ok(envelope(service.submit(req).await))
}

async fn handle_stop(job_id: String, service: Arc<JobService>) -> Result<impl warp::Reply, Infallible> {
  Ok(envelope(service.stop(&job_id).await))
}

async fn handle_stop_big_one(req: BigOne, service: Arc<JobService>) -> Result<impl warp::Reply, Infallible> {
  Ok(envelope(service.stop_big_one(req).await))
}

async fn handle_list(query: ListQuery, service: Arc<JobService>) -> Result<impl warp::Reply, Infallible> {
  Ok(envelope(service.list(query).await))
}

async fn handle_info(job_id: String, service: Arc<JobService>) -> Result<impl warp::Reply, Infallible> {
  Ok(envelope(service.info(&job_id).await))
}
