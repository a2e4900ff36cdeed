use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Row};
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{info, error};

use crate::error::StoreError;
use crate::store::KvStore;

static MIGRATOR: Migrator = sqlx::migrate!();

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

pub async fn setup_database(database_url: &str) -> Result<PgPool, StoreError> {
  let pool = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    PgPool::connect(database_url)
  })
    .await?;

  MIGRATOR.run(&pool)
    .await
    .map_err(|e| StoreError::Database(e.into()))?;
  info!("Database migrations complete");
  Ok(pool)
}

/// `KvStore` over the `kv_records` table. Expired rows are invisible to reads
/// and removed by `purge_expired`.
#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
    Ok(Self::new(setup_database(database_url).await?))
  }

  pub async fn purge_expired(&self) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM kv_records WHERE expires_at <= NOW()")
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected())
  }

  /// Deletes expired rows every `period` until the process exits.
  pub async fn run_sweeper(self, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
      interval.tick().await;
      match self.purge_expired().await {
        Ok(0) => {}
        Ok(removed) => info!("Purged {} expired records", removed),
        Err(e) => error!("Failed to purge expired records: {:?}", e),
      }
    }
  }
}

#[async_trait]
impl KvStore for PgStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let row = sqlx::query("SELECT value FROM kv_records WHERE key = $1 AND expires_at > NOW()")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;
    Ok(match row {
      Some(row) => Some(row.try_get("value")?),
      None => None,
    })
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
    sqlx::query(
      "INSERT INTO kv_records (key, value, expires_at)
       VALUES ($1, $2, NOW() + make_interval(secs => $3))
       ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
    )
      .bind(key)
      .bind(value)
      .bind(ttl.as_secs_f64())
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
    let rows = sqlx::query(
      "SELECT key, value FROM kv_records
       WHERE left(key, length($1)) = $1 AND expires_at > NOW()",
    )
      .bind(prefix)
      .fetch_all(&self.pool)
      .await?;
    rows
      .into_iter()
      .map(|row| -> Result<(String, String), StoreError> {
        Ok((row.try_get("key")?, row.try_get("value")?))
      })
      .collect()
  }

  async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
    let row = sqlx::query(
      "SELECT EXTRACT(EPOCH FROM (expires_at - NOW()))::float8 AS remaining
       FROM kv_records WHERE key = $1 AND expires_at > NOW()",
    )
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;
    match row {
      Some(row) => {
        let remaining: f64 = row.try_get("remaining")?;
        Ok(Some(Duration::from_secs_f64(remaining.max(0.0))))
      }
      None => Ok(None),
    }
  }
}
