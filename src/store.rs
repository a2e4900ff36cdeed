//! Expiring key-value storage shared by the balancer, its agents and the dashboard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::StoreError;

pub const NODE_STATUS_PREFIX: &str = "comfy:node:status:";
pub const TASK_PREFIX: &str = "comfy:task:";

pub const NODE_RECORD_TTL: Duration = Duration::from_secs(60);
pub const TASK_RECORD_TTL: Duration = Duration::from_secs(3600);

pub fn node_key(addr: &impl std::fmt::Display) -> String {
  format!("{}{}", NODE_STATUS_PREFIX, addr)
}

pub fn task_key(task_id: &str) -> String {
  format!("{}{}", TASK_PREFIX, task_id)
}

/// Single-key reads and writes with per-key expiry. No multi-key atomicity.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  /// Overwrites `key` and resets its expiry to `ttl` from now.
  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

  /// Live entries whose key starts with `prefix`, in no particular order.
  async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

  async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}

struct Entry {
  value: String,
  expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl KvStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let mut entries = self.entries.lock().await;
    let now = Instant::now();
    match entries.get(key) {
      Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
      Some(_) => {
        entries.remove(key);
        Ok(None)
      }
      None => Ok(None),
    }
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
    let entry = Entry {
      value: value.to_string(),
      expires_at: Instant::now() + ttl,
    };
    self.entries.lock().await.insert(key.to_string(), entry);
    Ok(())
  }

  async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
    let mut entries = self.entries.lock().await;
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
    Ok(
      entries
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, entry)| (key.clone(), entry.value.clone()))
        .collect(),
    )
  }

  async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
    let entries = self.entries.lock().await;
    let now = Instant::now();
    Ok(
      entries
        .get(key)
        .filter(|entry| entry.expires_at > now)
        .map(|entry| entry.expires_at - now),
    )
  }
}
