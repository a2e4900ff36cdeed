use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Serialize, Deserialize};
use tokio::sync::RwLock;

use crate::error::BalancerError;
use crate::store::NODE_RECORD_TTL;

fn env_or<T>(key: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  parse_or(key, env::var(key).ok(), default)
}

/// An unset variable takes the default; a set one must parse.
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match raw {
    Some(v) => v
      .trim()
      .parse()
      .with_context(|| format!("{} has invalid value '{}'", key, v)),
    None => Ok(default),
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub server_port: u16,
  pub forward_timeout: Duration,
  pub sse_poll_interval: Duration,
  pub selection: SelectionSettings,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let selection = SelectionSettings {
      staleness_window_secs: env_or("NODE_STALENESS_SECS", 10.0)?,
      gpu_weight: env_or("GPU_WEIGHT", 0.7)?,
      cpu_weight: env_or("CPU_WEIGHT", 0.3)?,
    };
    selection.validate().context("invalid node selection settings")?;

    Ok(Self {
      database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
      server_port: env_or("SERVER_PORT", 7999)?,
      forward_timeout: Duration::from_secs(env_or("FORWARD_TIMEOUT_SECS", 30)?),
      sse_poll_interval: Duration::from_secs(env_or("SSE_POLL_INTERVAL_SECS", 2)?),
      selection,
    })
  }
}

/// Settings for the process running next to a generation backend.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  pub database_url: String,
  pub service_host: String,
  pub service_port: u16,
  pub heartbeat_interval: Duration,
}

impl AgentConfig {
  pub fn from_env() -> Result<Self> {
    Ok(Self {
      database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
      service_host: env::var("SERVICE_HOST").unwrap_or_else(|_| "localhost".into()),
      service_port: env_or("SERVICE_PORT", 8188)?,
      heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_INTERVAL_SECS", 5)?),
    })
  }
}

/// Node health and scoring parameters that may change while the balancer runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionSettings {
  pub staleness_window_secs: f64,
  pub gpu_weight: f64,
  pub cpu_weight: f64,
}

impl Default for SelectionSettings {
  fn default() -> Self {
    Self {
      staleness_window_secs: 10.0,
      gpu_weight: 0.7,
      cpu_weight: 0.3,
    }
  }
}

impl SelectionSettings {
  pub fn validate(&self) -> Result<(), BalancerError> {
    let max_window = NODE_RECORD_TTL.as_secs_f64();
    if !self.staleness_window_secs.is_finite()
      || self.staleness_window_secs <= 0.0
      || self.staleness_window_secs >= max_window
    {
      return Err(BalancerError::InvalidSettings(format!(
        "staleness_window_secs must be within (0, {})",
        max_window
      )));
    }
    for (name, weight) in [("gpu_weight", self.gpu_weight), ("cpu_weight", self.cpu_weight)] {
      if !weight.is_finite() || weight < 0.0 {
        return Err(BalancerError::InvalidSettings(format!(
          "{} must be a non-negative number",
          name
        )));
      }
    }
    if self.gpu_weight + self.cpu_weight <= 0.0 {
      return Err(BalancerError::InvalidSettings("weights must not both be zero".into()));
    }
    Ok(())
  }

  pub fn score(&self, gpu_usage: f64, cpu_usage: f64) -> f64 {
    self.gpu_weight * gpu_usage + self.cpu_weight * cpu_usage
  }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
  pub staleness_window_secs: Option<f64>,
  pub gpu_weight: Option<f64>,
  pub cpu_weight: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SharedSettings {
  inner: Arc<RwLock<SelectionSettings>>,
}

impl SharedSettings {
  pub fn new(settings: SelectionSettings) -> Self {
    Self {
      inner: Arc::new(RwLock::new(settings)),
    }
  }

  pub async fn current(&self) -> SelectionSettings {
    *self.inner.read().await
  }

  /// Applies `update` only if the merged result validates.
  pub async fn update(&self, update: SettingsUpdate) -> Result<SelectionSettings, BalancerError> {
    let mut guard = self.inner.write().await;
    let candidate = SelectionSettings {
      staleness_window_secs: update.staleness_window_secs.unwrap_or(guard.staleness_window_secs),
      gpu_weight: update.gpu_weight.unwrap_or(guard.gpu_weight),
      cpu_weight: update.cpu_weight.unwrap_or(guard.cpu_weight),
    };
    candidate.validate()?;
    *guard = candidate;
    Ok(candidate)
  }
}

impl Default for SharedSettings {
  fn default() -> Self {
    Self::new(SelectionSettings::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio_test::{assert_err, assert_ok};

  #[test]
  fn test_unset_variable_takes_default() {
    assert_eq!(assert_ok!(parse_or("SERVER_PORT", None, 7999u16)), 7999);
    assert_eq!(assert_ok!(parse_or("SERVER_PORT", Some(" 8080 ".into()), 7999u16)), 8080);
  }

  #[test]
  fn test_unparsable_variable_is_an_error() {
    let err = assert_err!(parse_or("GPU_WEIGHT", Some("abc".into()), 0.7f64));
    assert!(err.to_string().contains("GPU_WEIGHT has invalid value 'abc'"));
    assert_err!(parse_or("SERVER_PORT", Some("70000".into()), 7999u16));
  }

  #[test]
  fn test_defaults_are_valid() {
    assert_ok!(SelectionSettings::default().validate());
  }

  #[test]
  fn test_score_uses_weights() {
    let settings = SelectionSettings::default();
    assert!((settings.score(80.0, 10.0) - 59.0).abs() < 1e-9);
    assert!((settings.score(50.0, 90.0) - 62.0).abs() < 1e-9);
  }

  #[tokio::test]
  async fn test_update_merges_fields() {
    let shared = SharedSettings::default();
    let updated = shared
      .update(SettingsUpdate {
        gpu_weight: Some(0.5),
        cpu_weight: Some(0.5),
        ..Default::default()
      })
      .await
      .unwrap();
    assert_eq!(updated.gpu_weight, 0.5);
    assert_eq!(updated.staleness_window_secs, 10.0);
    assert_eq!(shared.current().await, updated);
  }

  #[tokio::test]
  async fn test_invalid_update_leaves_settings_untouched() {
    let shared = SharedSettings::default();
    assert_err!(
      shared
        .update(SettingsUpdate {
          staleness_window_secs: Some(120.0),
          ..Default::default()
        })
        .await
    );
    assert_err!(
      shared
        .update(SettingsUpdate {
          gpu_weight: Some(0.0),
          cpu_weight: Some(0.0),
          ..Default::default()
        })
        .await
    );
    assert_err!(
      shared
        .update(SettingsUpdate {
          cpu_weight: Some(-1.0),
          ..Default::default()
        })
        .await
    );
    assert_eq!(shared.current().await, SelectionSettings::default());
  }
}
