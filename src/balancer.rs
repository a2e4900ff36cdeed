use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{info, error};
use uuid::Uuid;

use crate::config::SharedSettings;
use crate::error::{BalancerError, Result};
use crate::forwarder::Forwarder;
use crate::models::{NodeStatus, TaskRecord};
use crate::registry::NodeRegistry;
use crate::selector::select;
use crate::store::KvStore;
use crate::task_tracker::TaskTracker;

static TASK_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[A-Za-z0-9_\-]+$").expect("task id pattern is valid")
});

pub fn validate_task_id(task_id: &str) -> Result<()> {
  if TASK_ID_PATTERN.is_match(task_id) {
    Ok(())
  } else {
    Err(BalancerError::InvalidInput(format!("invalid task id '{}'", task_id)))
  }
}

/// Routes generation jobs to the least-loaded healthy node and tracks them.
#[derive(Clone)]
pub struct Balancer {
  registry: NodeRegistry,
  forwarder: Forwarder,
  tasks: TaskTracker,
  settings: SharedSettings,
}

impl Balancer {
  pub fn new(store: Arc<dyn KvStore>, forwarder: Forwarder, settings: SharedSettings) -> Self {
    Self {
      registry: NodeRegistry::new(store.clone(), settings.clone()),
      tasks: TaskTracker::new(store, forwarder.clone()),
      forwarder,
      settings,
    }
  }

  pub fn settings(&self) -> &SharedSettings {
    &self.settings
  }

  pub fn tasks(&self) -> &TaskTracker {
    &self.tasks
  }

  pub async fn health(&self) -> Result<Vec<NodeStatus>> {
    self.registry.list_nodes().await
  }

  /// Submits `body` to the best node and records the assignment. The node's
  /// reply is returned with `task_id` set.
  pub async fn generate(&self, body: Value) -> Result<Value> {
    info!("/api/generate params: {}", body);
    let client_id = body
      .get("client_id")
      .and_then(Value::as_str)
      .map(str::to_string)
      .unwrap_or_else(|| Uuid::new_v4().to_string());

    let nodes = self.registry.list_nodes().await?;
    let settings = self.settings.current().await;
    let node = select(&nodes, &settings)?.record.addr();

    let mut response = self
      .forwarder
      .forward(&node, "/generate", "POST", Some(&body))
      .await?;

    let task_id = match response.get("task_id").and_then(Value::as_str) {
      Some(id) => id.to_string(),
      None => {
        error!("Node {} accepted a job without returning a task_id", node);
        return Err(BalancerError::forward(
          Forwarder::url(&node, "/generate"),
          "response has no task_id",
        ));
      }
    };

    if let Err(e) = validate_task_id(&task_id) {
      error!("Node {} returned an unusable task_id: {}", node, e);
      return Err(BalancerError::forward(Forwarder::url(&node, "/generate"), e));
    }

    let record = self.tasks.create(&task_id, &client_id, &node).await?;
    info!("Task {} for client {} submitted to {}", task_id, client_id, node);
    overlay(&mut response, &record, false);
    Ok(response)
  }

  /// Refreshes the task from its node; the reply carries the normalized status.
  pub async fn task_status(&self, task_id: &str) -> Result<(TaskRecord, Value)> {
    validate_task_id(task_id)?;
    let refreshed = self.tasks.refresh(task_id).await?;
    let mut response = refreshed.response;
    overlay(&mut response, &refreshed.record, true);
    Ok((refreshed.record, response))
  }
}

fn overlay(response: &mut Value, record: &TaskRecord, with_status: bool) {
  if !response.is_object() {
    *response = Value::Object(Default::default());
  }
  if let Some(map) = response.as_object_mut() {
    map.insert("task_id".into(), Value::String(record.task_id.clone()));
    if with_status {
      map.insert("status".into(), Value::String(record.status.to_string()));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use serde_json::json;
  use std::time::Duration;

  fn balancer() -> Balancer {
    Balancer::new(
      Arc::new(MemoryStore::new()),
      Forwarder::new(Duration::from_secs(1)).unwrap(),
      SharedSettings::default(),
    )
  }

  #[test]
  fn test_task_id_validation() {
    assert!(validate_task_id("3f2a-11ee_b").is_ok());
    assert!(validate_task_id("../etc/passwd").is_err());
    assert!(validate_task_id("").is_err());
  }

  #[tokio::test]
  async fn test_generate_with_empty_pool() {
    let err = balancer().generate(json!({"workflow_name": "w"})).await.unwrap_err();
    assert!(matches!(err, BalancerError::NoNodesAvailable));
  }

  #[tokio::test]
  async fn test_status_of_invalid_id_is_rejected() {
    let err = balancer().task_status("a/b").await.unwrap_err();
    assert!(matches!(err, BalancerError::InvalidInput(_)));
  }

  #[test]
  fn test_overlay_replaces_non_object() {
    let record = TaskRecord {
      task_id: "t1".into(),
      client_id: "c".into(),
      node: "n:1".into(),
      status: Default::default(),
      message: String::new(),
      images: vec![],
      timestamp: 0.0,
    };
    let mut response = json!("text");
    overlay(&mut response, &record, true);
    assert_eq!(response, json!({"task_id": "t1", "status": "pending"}));
  }
}
