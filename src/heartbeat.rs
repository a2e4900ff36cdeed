use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::Result;
use crate::models::{NodeAddr, NodeRecord, epoch_now};
use crate::node_metrics::MetricsSampler;
use crate::store::{KvStore, NODE_RECORD_TTL, node_key};

/// Publishes this node's load so the balancer can route to it. A node that
/// stops reporting goes stale after the staleness window and vanishes once
/// its record expires.
pub struct HeartbeatReporter {
  store: Arc<dyn KvStore>,
  addr: NodeAddr,
}

impl HeartbeatReporter {
  pub fn new(store: Arc<dyn KvStore>, addr: NodeAddr) -> Self {
    Self { store, addr }
  }

  pub async fn report(&self, cpu_usage: f64, gpu_usage: f64) -> Result<NodeRecord> {
    let record = NodeRecord {
      host: self.addr.host.clone(),
      port: self.addr.port,
      cpu_usage,
      gpu_usage,
      last_update: epoch_now(),
    };
    let value = serde_json::to_string(&record)?;
    self.store.set_ex(&node_key(&self.addr), &value, NODE_RECORD_TTL).await?;
    Ok(record)
  }

  pub async fn run(self, mut sampler: MetricsSampler, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
      interval.tick().await;
      let cpu = sampler.cpu_usage().await;
      let gpu = sampler.gpu_usage().await;
      match self.report(cpu, gpu).await {
        Ok(_) => debug!("Sent heartbeat for {}: cpu={:.1}%, gpu={:.1}%", self.addr, cpu, gpu),
        Err(e) => error!("Error updating node status: {:?}", e),
      }
    }
  }
}
