use std::convert::Infallible;
use std::time::Duration;

use warp::Filter;

use crate::balancer::Balancer;

pub mod errors;
pub mod settings;
pub mod sse;
pub mod tasks;

pub fn routes(
  balancer: Balancer,
  sse_poll_interval: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
  let cors = warp::cors()
    .allow_any_origin()
    .allow_methods(vec!["GET", "POST"])
    .allow_headers(vec![
      "accept",
      "accept-language",
      "authorization",
      "cache-control",
      "content-type",
      "last-event-id",
      "origin",
      "x-requested-with",
    ]);

  tasks::generate_route(balancer.clone())
    .or(sse::events_route(balancer.clone(), sse_poll_interval))
    .or(tasks::task_status_route(balancer.clone()))
    .or(tasks::health_route(balancer.clone()))
    .or(settings::settings_routes(balancer))
    .with(cors)
    .recover(errors::handle_rejection)
}
