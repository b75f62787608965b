//! In-process implementations of the queue, object store and status store.
//!
//! They back the worker and API tests, and are handy for running the pipeline
//! without Redis or S3.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::models::job::{Job, JobStatus};
use crate::services::queue::{Delivery, MessageQueue, QueueError};
use crate::services::status::{StatusError, StatusStore};
use crate::services::storage::{ObjectStore, StorageError};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail as if the store rejected it.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub async fn insert(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        self.insert(key, data.to_vec(), content_type).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.object(key).await.map(|object| object.data))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Status store that also records every status it was asked to persist.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, Job>>,
    history: Mutex<Vec<(String, JobStatus)>>,
    fail_saves: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Statuses written for one job, in write order. Failed writes are not
    /// recorded.
    pub async fn history(&self, job_id: &str) -> Vec<JobStatus> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn save(&self, job: &Job) -> Result<(), StatusError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StatusError::Unavailable("writes disabled".to_string()));
        }
        self.records.lock().await.insert(job.id.clone(), job.clone());
        self.history.lock().await.push((job.id.clone(), job.status));
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Job>, StatusError> {
        Ok(self.records.lock().await.get(job_id).cloned())
    }

    async fn health_check(&self) -> Result<(), StatusError> {
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    in_flight: Vec<String>,
}

/// FIFO queue with the same in-flight/ack semantics as the Redis queue.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw payload, valid or not.
    pub async fn push_payload(&self, payload: impl Into<String>) {
        self.state.lock().await.pending.push_back(payload.into());
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        self.push_payload(payload).await;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(payload) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.in_flight.push(payload.clone());
        Ok(Some(Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.in_flight.iter().position(|p| *p == delivery.payload) {
            state.in_flight.remove(pos);
        }
        Ok(())
    }

    async fn requeue_in_flight(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let moved: Vec<String> = state.in_flight.drain(..).collect();
        let count = moved.len() as u64;
        state.pending.extend(moved);
        Ok(count)
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
