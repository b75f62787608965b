use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::job::Job;

const STATUS_KEY_PREFIX: &str = "job";

/// Status-store key for a job id.
pub fn status_key(job_id: &str) -> String {
    format!("{}:{}", STATUS_KEY_PREFIX, job_id)
}

/// Durable copy of job envelopes, read by the status API.
///
/// Every save replaces the whole record and refreshes its expiry.
/// `load` returns `Ok(None)` when the key is absent (never submitted or
/// expired), which is distinct from any job status.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn save(&self, job: &Job) -> Result<(), StatusError>;

    async fn load(&self, job_id: &str) -> Result<Option<Job>, StatusError>;

    async fn health_check(&self) -> Result<(), StatusError>;
}

/// Redis `SET .. EX` status store.
pub struct RedisStatusStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, StatusError> {
        let client = redis::Client::open(redis_url).map_err(StatusError::Redis)?;
        Ok(Self { client, ttl })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StatusError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StatusError::Redis)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn save(&self, job: &Job) -> Result<(), StatusError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.set_ex::<_, _, ()>(status_key(&job.id), payload, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Job>, StatusError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(status_key(job_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StatusError::Serialize))
            .transpose()
    }

    async fn health_check(&self) -> Result<(), StatusError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Status store unavailable: {0}")]
    Unavailable(String),
}
