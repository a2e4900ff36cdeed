use std::convert::Infallible;

use serde_json::{Value, json};
use warp::Filter;

use crate::balancer::Balancer;
use crate::routes::errors::reject;

const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

pub(crate) fn with_balancer(balancer: Balancer) -> impl Filter<Extract = (Balancer,), Error = Infallible> + Clone {
  warp::any().map(move || balancer.clone())
}

pub fn generate_route(balancer: Balancer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "generate")
    .and(warp::post())
    .and(warp::body::content_length_limit(MAX_BODY_BYTES))
    .and(warp::body::json())
    .and(with_balancer(balancer))
    .and_then(handle_generate)
}

pub fn task_status_route(balancer: Balancer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "task" / String)
    .and(warp::get())
    .and(with_balancer(balancer))
    .and_then(handle_task_status)
}

pub fn health_route(balancer: Balancer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("health")
    .and(warp::get())
    .and(with_balancer(balancer))
    .and_then(handle_health)
}

async fn handle_generate(body: Value, balancer: Balancer) -> Result<impl warp::Reply, warp::Rejection> {
  let response = balancer.generate(body).await.map_err(reject)?;
  Ok(warp::reply::json(&response))
}

async fn handle_task_status(task_id: String, balancer: Balancer) -> Result<impl warp::Reply, warp::Rejection> {
  let (_, response) = balancer.task_status(&task_id).await.map_err(reject)?;
  Ok(warp::reply::json(&response))
}

async fn handle_health(balancer: Balancer) -> Result<impl warp::Reply, warp::Rejection> {
  let nodes = balancer.health().await.map_err(reject)?;
  Ok(warp::reply::json(&json!({ "status": "healthy", "nodes": nodes })))
}
