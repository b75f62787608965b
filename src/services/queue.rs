use async_trait::async_trait;
use redis::AsyncCommands;

use crate::models::job::Job;

const QUEUE_KEY: &str = "image_pipeline:jobs";
const PROCESSING_KEY_PREFIX: &str = "image_pipeline:processing";

/// One delivered message. The raw payload is kept so it can be acknowledged
/// even when it does not decode into a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub payload: String,
}

impl Delivery {
    pub fn decode(&self) -> Result<Job, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// At-least-once job queue.
///
/// A dequeued message stays in flight until acknowledged; in-flight
/// messages left behind by a crashed worker can be redelivered.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Move unacknowledged in-flight messages back onto the queue.
    async fn requeue_in_flight(&self) -> Result<u64, QueueError>;

    async fn queue_depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis list-backed queue: `RPOPLPUSH` into a per-worker processing list,
/// `LREM` to acknowledge.
pub struct JobQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
}

impl JobQueue {
    pub fn new(redis_url: &str, worker_id: &str) -> Result<Self, QueueError> {
        Self::with_queue_key(redis_url, QUEUE_KEY, worker_id)
    }

    /// A queue on a list other than the shared job list, with its in-flight
    /// list namespaced under it.
    pub fn with_queue_key(
        redis_url: &str,
        queue_key: &str,
        worker_id: &str,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        let processing_key = if queue_key == QUEUE_KEY {
            format!("{}:{}", PROCESSING_KEY_PREFIX, worker_id)
        } else {
            format!("{}:processing:{}", queue_key, worker_id)
        };
        Ok(Self {
            client,
            queue_key: queue_key.to_string(),
            processing_key,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl MessageQueue for JobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .rpoplpush(&self.queue_key, &self.processing_key)
            .await
            .map_err(QueueError::Redis)?;
        Ok(payload.map(|payload| Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn requeue_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn
                .rpoplpush(&self.processing_key, &self.queue_key)
                .await
                .map_err(QueueError::Redis)?;
            match payload {
                Some(_) => moved += 1,
                None => return Ok(moved),
            }
        }
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_list_is_per_worker_and_per_queue() {
        let shared = JobQueue::new("redis://localhost:6379", "w1").unwrap();
        assert_eq!(shared.queue_key, "image_pipeline:jobs");
        assert_eq!(shared.processing_key, "image_pipeline:processing:w1");

        let scratch =
            JobQueue::with_queue_key("redis://localhost:6379", "scratch:jobs", "w1").unwrap();
        assert_eq!(scratch.queue_key, "scratch:jobs");
        assert_eq!(scratch.processing_key, "scratch:jobs:processing:w1");
    }
}
