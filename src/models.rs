use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Serialize, Deserialize};

use crate::error::BalancerError;

/// Seconds since the Unix epoch, with millisecond precision.
pub fn epoch_now() -> f64 {
  Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddr {
  pub host: String,
  pub port: u16,
}

impl NodeAddr {
  pub fn new(host: impl Into<String>, port: u16) -> Self {
    Self { host: host.into(), port }
  }
}

impl fmt::Display for NodeAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

impl FromStr for NodeAddr {
  type Err = BalancerError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (host, port) = s
      .rsplit_once(':')
      .ok_or_else(|| BalancerError::malformed(s, "node address must be host:port"))?;
    if host.is_empty() {
      return Err(BalancerError::malformed(s, "empty host"));
    }
    let port = port
      .parse::<u16>()
      .map_err(|e| BalancerError::malformed(s, format!("invalid port: {}", e)))?;
    Ok(Self::new(host, port))
  }
}

/// Self-reported metrics of one node, as written by its heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
  pub host: String,
  pub port: u16,
  pub cpu_usage: f64,
  pub gpu_usage: f64,
  pub last_update: f64,
}

impl NodeRecord {
  pub fn addr(&self) -> NodeAddr {
    NodeAddr::new(self.host.clone(), self.port)
  }

  pub fn is_healthy_at(&self, now: f64, staleness_window_secs: f64) -> bool {
    now - self.last_update < staleness_window_secs
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
  #[serde(flatten)]
  pub record: NodeRecord,
  pub is_healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  #[default]
  Pending,
  Success,
  Error,
}

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskStatus::Success | TaskStatus::Error)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::Success => "success",
      TaskStatus::Error => "error",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "pending" => Some(TaskStatus::Pending),
      "success" => Some(TaskStatus::Success),
      "error" => Some(TaskStatus::Error),
      _ => None,
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Assignment and last-known state of a generation task.
///
/// `node` is fixed at creation; every status poll targets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
  pub task_id: String,
  pub client_id: String,
  pub node: String,
  #[serde(default)]
  pub status: TaskStatus,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub images: Vec<serde_json::Value>,
  pub timestamp: f64,
}
