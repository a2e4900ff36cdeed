use std::sync::Arc;

use tracing::error;

use crate::config::SharedSettings;
use crate::error::Result;
use crate::models::{NodeRecord, NodeStatus, epoch_now};
use crate::store::{KvStore, NODE_STATUS_PREFIX};

/// Builds health snapshots of the node pool from heartbeat records.
#[derive(Clone)]
pub struct NodeRegistry {
  store: Arc<dyn KvStore>,
  settings: SharedSettings,
}

impl NodeRegistry {
  pub fn new(store: Arc<dyn KvStore>, settings: SharedSettings) -> Self {
    Self { store, settings }
  }

  pub async fn list_nodes(&self) -> Result<Vec<NodeStatus>> {
    self.list_nodes_at(epoch_now()).await
  }

  /// Every live record, healthy or not, judged against `now`. Malformed
  /// records are logged and skipped.
  pub async fn list_nodes_at(&self, now: f64) -> Result<Vec<NodeStatus>> {
    let window = self.settings.current().await.staleness_window_secs;
    let entries = self.store.scan_prefix(NODE_STATUS_PREFIX).await?;

    let nodes = entries
      .into_iter()
      .filter_map(|(key, value)| match serde_json::from_str::<NodeRecord>(&value) {
        Ok(record) => {
          let is_healthy = record.is_healthy_at(now, window);
          Some(NodeStatus { record, is_healthy })
        }
        Err(e) => {
          error!("Error parsing node data under {}: {}", key, e);
          None
        }
      })
      .collect();
    Ok(nodes)
  }
}
