use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use comfy_balancer::{
  config::AgentConfig,
  database::PgStore,
  heartbeat::HeartbeatReporter,
  models::NodeAddr,
  node_metrics::MetricsSampler,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let config = AgentConfig::from_env()?;
  let store = PgStore::connect(&config.database_url).await?;

  let addr = NodeAddr::new(config.service_host.clone(), config.service_port);
  info!("Reporting heartbeat for {} every {:?}", addr, config.heartbeat_interval);
  HeartbeatReporter::new(Arc::new(store), addr)
    .run(MetricsSampler::new(), config.heartbeat_interval)
    .await;
  Ok(())
}
