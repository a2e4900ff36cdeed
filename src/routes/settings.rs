use warp::Filter;

use crate::balancer::Balancer;
use crate::config::SettingsUpdate;
use crate::routes::errors::reject;
use crate::routes::tasks::with_balancer;

pub fn settings_routes(balancer: Balancer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let get = warp::path!("api" / "config")
    .and(warp::get())
    .and(with_balancer(balancer.clone()))
    .and_then(handle_get);

  let update = warp::path!("api" / "config")
    .and(warp::post())
    .and(warp::body::content_length_limit(16 * 1024))
    .and(warp::body::json())
    .and(with_balancer(balancer))
    .and_then(handle_update);

  get.or(update)
}

async fn handle_get(balancer: Balancer) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&balancer.settings().current().await))
}

async fn handle_update(update: SettingsUpdate, balancer: Balancer) -> Result<impl warp::Reply, warp::Rejection> {
  let settings = balancer.settings().update(update).await.map_err(reject)?;
  tracing::info!("Node selection settings updated: {:?}", settings);
  Ok(warp::reply::json(&settings))
}
