use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{BalancerError, Result};
use crate::forwarder::Forwarder;
use crate::models::{NodeAddr, TaskRecord, TaskStatus, epoch_now};
use crate::store::{KvStore, TASK_PREFIX, TASK_RECORD_TTL, task_key};

/// Result of a status poll: the rewritten record and the node's raw reply.
#[derive(Debug, Clone)]
pub struct Refreshed {
  pub record: TaskRecord,
  pub response: Value,
}

#[derive(Clone)]
pub struct TaskTracker {
  store: Arc<dyn KvStore>,
  forwarder: Forwarder,
}

impl TaskTracker {
  pub fn new(store: Arc<dyn KvStore>, forwarder: Forwarder) -> Self {
    Self { store, forwarder }
  }

  pub async fn create(&self, task_id: &str, client_id: &str, node: &NodeAddr) -> Result<TaskRecord> {
    let record = TaskRecord {
      task_id: task_id.to_string(),
      client_id: client_id.to_string(),
      node: node.to_string(),
      status: TaskStatus::Pending,
      message: String::new(),
      images: Vec::new(),
      timestamp: epoch_now(),
    };
    self.save(&record).await?;
    info!("Task {} assigned to node {}", task_id, record.node);
    Ok(record)
  }

  pub async fn load(&self, task_id: &str) -> Result<TaskRecord> {
    let key = task_key(task_id);
    let raw = self
      .store
      .get(&key)
      .await?
      .ok_or_else(|| BalancerError::TaskNotFound(task_id.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| BalancerError::malformed(key, e))
  }

  /// Polls the task's assigned node and rewrites the record with a fresh expiry.
  pub async fn refresh(&self, task_id: &str) -> Result<Refreshed> {
    let mut record = self.load(task_id).await?;
    let node: NodeAddr = record.node.parse()?;

    let response = self
      .forwarder
      .forward(&node, &format!("/task/{}", task_id), "GET", None)
      .await?;
    merge_status(&mut record, &response);
    self.save(&record).await?;

    Ok(Refreshed { record, response })
  }

  /// Every live task record; unreadable entries are skipped.
  pub async fn list(&self) -> Result<Vec<TaskRecord>> {
    let entries = self.store.scan_prefix(TASK_PREFIX).await?;
    Ok(
      entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_str::<TaskRecord>(&value) {
          Ok(record) => Some(record),
          Err(e) => {
            warn!("Skipping malformed task record {}: {}", key, e);
            None
          }
        })
        .collect(),
    )
  }

  async fn save(&self, record: &TaskRecord) -> Result<()> {
    let value = serde_json::to_string(record)?;
    self
      .store
      .set_ex(&task_key(&record.task_id), &value, TASK_RECORD_TTL)
      .await?;
    Ok(())
  }
}

/// The node is the only authority on status. A reply without a recognizable
/// status (an error body, an unknown value) leaves the record untouched, so a
/// finished task never loses its state or output.
fn merge_status(record: &mut TaskRecord, response: &Value) {
  let status = match response.get("status").and_then(Value::as_str) {
    Some(raw) => match TaskStatus::parse(raw) {
      Some(status) => status,
      None => {
        warn!("Task {} reported unknown status '{}'", record.task_id, raw);
        return;
      }
    },
    None => {
      warn!("Task {} poll returned no status, keeping {}", record.task_id, record.status);
      return;
    }
  };
  record.status = status;
  record.message = response
    .get("message")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();
  record.images = response
    .get("images")
    .and_then(Value::as_array)
    .cloned()
    .unwrap_or_default();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use serde_json::json;
  use std::time::Duration;

  fn tracker(store: Arc<MemoryStore>) -> TaskTracker {
    TaskTracker::new(store, Forwarder::new(Duration::from_secs(1)).unwrap())
  }

  fn pending_record() -> TaskRecord {
    TaskRecord {
      task_id: "t1".into(),
      client_id: "c1".into(),
      node: "10.0.0.1:9000".into(),
      status: TaskStatus::Pending,
      message: String::new(),
      images: vec![],
      timestamp: 0.0,
    }
  }

  #[tokio::test]
  async fn test_create_writes_pending_record_with_hour_expiry() {
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(store.clone());

    let record = tracker
      .create("t1", "c1", &NodeAddr::new("10.0.0.1", 9000))
      .await
      .unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.node, "10.0.0.1:9000");
    assert!(record.images.is_empty());

    assert_eq!(tracker.load("t1").await.unwrap(), record);
    let ttl = store.ttl(&task_key("t1")).await.unwrap().unwrap();
    assert!(ttl > Duration::from_secs(3590) && ttl <= TASK_RECORD_TTL);
  }

  #[tokio::test]
  async fn test_refresh_unknown_task_is_not_found() {
    let tracker = tracker(Arc::new(MemoryStore::new()));
    let err = tracker.refresh("unknown-id").await.unwrap_err();
    assert!(matches!(err, BalancerError::TaskNotFound(id) if id == "unknown-id"));
  }

  #[tokio::test]
  async fn test_corrupt_task_record_is_malformed() {
    let store = Arc::new(MemoryStore::new());
    store.set_ex(&task_key("t1"), "[]", TASK_RECORD_TTL).await.unwrap();
    let err = tracker(store).load("t1").await.unwrap_err();
    assert!(matches!(err, BalancerError::MalformedRecord { .. }));
  }

  #[test]
  fn test_merge_success() {
    let mut record = pending_record();
    merge_status(
      &mut record,
      &json!({"status": "success", "message": "done", "images": ["a.png"]}),
    );
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.message, "done");
    assert_eq!(record.images, vec![json!("a.png")]);
  }

  #[test]
  fn test_merge_missing_optional_fields_default() {
    let mut record = pending_record();
    record.message = "old".into();
    merge_status(&mut record, &json!({"status": "pending"}));
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.message, "");
    assert!(record.images.is_empty());
  }

  #[test]
  fn test_reply_without_status_keeps_finished_task() {
    let mut record = pending_record();
    merge_status(&mut record, &json!({"status": "success", "message": "done", "images": ["a.png"]}));
    merge_status(&mut record, &json!({"detail": "Internal error"}));
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.message, "done");
    assert_eq!(record.images, vec![json!("a.png")]);
  }

  #[test]
  fn test_merge_unknown_status_keeps_current() {
    let mut record = pending_record();
    record.status = TaskStatus::Success;
    record.images = vec![json!("a.png")];
    merge_status(&mut record, &json!({"status": "exploded"}));
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.images, vec![json!("a.png")]);
  }

  #[test]
  fn test_merge_is_idempotent() {
    let response = json!({"status": "error", "message": "Task has been failed."});
    let mut once = pending_record();
    merge_status(&mut once, &response);
    let mut twice = once.clone();
    merge_status(&mut twice, &response);
    assert_eq!(once, twice);
  }

  #[tokio::test]
  async fn test_list_skips_unreadable_records() {
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(store.clone());
    tracker.create("t1", "c1", &NodeAddr::new("n", 1)).await.unwrap();
    store.set_ex(&task_key("bad"), "nope", TASK_RECORD_TTL).await.unwrap();

    let tasks = tracker.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, "t1");
  }
}
