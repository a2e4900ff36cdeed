use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use comfy_balancer::{
  balancer::Balancer,
  config::{Config, SharedSettings},
  database::PgStore,
  forwarder::Forwarder,
  routes::routes,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env()?;
  let store = PgStore::connect(&config.database_url).await?;
  tokio::spawn(store.clone().run_sweeper(Duration::from_secs(60)));

  let forwarder = Forwarder::new(config.forward_timeout)?;
  let balancer = Balancer::new(Arc::new(store), forwarder, SharedSettings::new(config.selection));

  info!("Comfy balancer listening on port {}", config.server_port);
  warp::serve(routes(balancer, config.sse_poll_interval))
    .run(([0, 0, 0, 0], config.server_port))
    .await;
  Ok(())
}
