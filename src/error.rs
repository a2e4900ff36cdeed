use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("store unavailable: {0}")]
  Unavailable(String),
}

#[derive(Error, Debug)]
pub enum BalancerError {
  /// The node pool is empty.
  #[error("No available nodes")]
  NoNodesAvailable,

  /// Nodes are registered but none reported within the staleness window.
  #[error("No healthy nodes available")]
  NoHealthyNodes,

  #[error("Method not allowed: {0}")]
  MethodNotAllowed(String),

  #[error("Error forwarding request to {url}: {reason}")]
  Forward { url: String, reason: String },

  #[error("Task not found: {0}")]
  TaskNotFound(String),

  #[error("Malformed record under '{key}': {reason}")]
  MalformedRecord { key: String, reason: String },

  #[error("Invalid input: {0}")]
  InvalidInput(String),

  #[error("Invalid settings: {0}")]
  InvalidSettings(String),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BalancerError>;

impl BalancerError {
  pub fn forward(url: impl Into<String>, reason: impl ToString) -> Self {
    Self::Forward {
      url: url.into(),
      reason: reason.to_string(),
    }
  }

  pub fn malformed(key: impl Into<String>, reason: impl ToString) -> Self {
    Self::MalformedRecord {
      key: key.into(),
      reason: reason.to_string(),
    }
  }
}
