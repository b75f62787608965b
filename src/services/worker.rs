//! The job consumption loop.
//!
//! One message is processed through to its terminal status write before the
//! next is dequeued. Per delivery the worker:
//!
//! 1. decodes the envelope (malformed payloads are acknowledged and dropped),
//! 2. marks the job `in_progress` and persists it,
//! 3. acquires and decodes the source (failure → `failed`, no operations run),
//! 4. runs every operation in order against the evolving raster, keeping the
//!    results of those that succeed,
//! 5. marks the job `completed` and persists it once more.
//!
//! Status writes that fail are logged and not retried. Acknowledgement
//! happens after the terminal write, so a crash mid-job leaves the message
//! in flight for redelivery.

use image::DynamicImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::models::job::{Job, JobStatus, OperationResult};
use crate::services::queue::{Delivery, MessageQueue, QueueError};
use crate::services::source::{SourceAcquirer, SourceError};
use crate::services::status::StatusStore;
use crate::services::transform::TransformPipeline;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Optional deadline for one job, from dequeue to terminal status.
    pub job_timeout: Option<Duration>,
    /// Move this worker's unacknowledged messages back to the queue on
    /// startup. Only safe when no other live process shares the worker id.
    pub recover_in_flight: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            job_timeout: None,
            recover_in_flight: true,
        }
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Payload did not decode into a job and was dropped.
    Dropped,
    /// The job reached a terminal status. `persisted` is false when the
    /// terminal status write failed.
    Finished { job: Job, persisted: bool },
}

/// Job-fatal errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Job exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

pub struct Worker {
    queue: Arc<dyn MessageQueue>,
    status: Arc<dyn StatusStore>,
    acquirer: SourceAcquirer,
    pipeline: TransformPipeline,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        status: Arc<dyn StatusStore>,
        acquirer: SourceAcquirer,
        pipeline: TransformPipeline,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            status,
            acquirer,
            pipeline,
            settings,
        }
    }

    /// Consume jobs until `shutdown` flips to true. The job in progress
    /// always finishes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.settings.recover_in_flight {
            match self.queue.requeue_in_flight().await {
                Ok(0) => {}
                Ok(count) => tracing::warn!(count, "Requeued unacknowledged in-flight jobs"),
                Err(e) => tracing::error!(error = %e, "Failed to requeue in-flight jobs"),
            }
        }

        tracing::info!("Worker ready, starting job processing loop");

        while !*shutdown.borrow() {
            let idle = match self.process_next().await {
                Ok(Some(_)) => {
                    tracing::debug!("Job processed, checking for next job");
                    false
                }
                Ok(None) => {
                    tracing::trace!("No jobs available, sleeping");
                    true
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue error, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.settings.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Dequeue and fully process one message. `Ok(None)` means the queue
    /// was empty.
    pub async fn process_next(&self) -> Result<Option<DeliveryOutcome>, QueueError> {
        let Some(delivery) = self.queue.dequeue().await? else {
            return Ok(None);
        };

        let outcome = self.handle_delivery(&delivery).await;
        self.queue.ack(&delivery).await?;
        Ok(Some(outcome))
    }

    /// Drive one delivered message to a terminal status.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> DeliveryOutcome {
        let job = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Dropping malformed job message");
                metrics::counter!("image_jobs_dropped_total").increment(1);
                return DeliveryOutcome::Dropped;
            }
        };

        if job.status != JobStatus::Pending {
            tracing::warn!(
                job_id = %job.id,
                status = %job.status,
                "Delivered envelope is not pending, reprocessing from the start"
            );
        }
        let mut job = job.into_delivery_cycle();

        tracing::info!(
            job_id = %job.id,
            source = %job.source_reference,
            operations = job.operations.len(),
            "Processing image job"
        );

        let started = Instant::now();

        if let Err(e) = job.start() {
            tracing::error!(job_id = %job.id, error = %e, "Cannot start job");
        }
        self.persist(&job).await;

        let outcome = match self.settings.job_timeout {
            Some(limit) => match timeout(limit, self.execute(&job)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(JobError::DeadlineExceeded(limit)),
            },
            None => self.execute(&job).await,
        };

        let transition = match outcome {
            Ok(results) => {
                let produced = results.len();
                let transition = job.complete(results);
                if transition.is_ok() {
                    metrics::counter!("image_jobs_completed_total").increment(1);
                    tracing::info!(
                        job_id = %job.id,
                        results = produced,
                        operations = job.operations.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                }
                transition
            }
            Err(e) => {
                let transition = job.fail(e.to_string());
                if transition.is_ok() {
                    metrics::counter!("image_jobs_failed_total").increment(1);
                    tracing::warn!(job_id = %job.id, error = %e, "Job failed");
                }
                transition
            }
        };
        if let Err(e) = transition {
            tracing::error!(job_id = %job.id, error = %e, "Invalid terminal transition");
        }
        metrics::histogram!("image_job_processing_seconds").record(started.elapsed().as_secs_f64());

        let persisted = self.persist(&job).await;
        DeliveryOutcome::Finished { job, persisted }
    }

    /// Acquire the source and fold the operations over it, dropping the
    /// ones that fail.
    async fn execute(&self, job: &Job) -> Result<Vec<OperationResult>, JobError> {
        let source = self.acquirer.acquire(&job.source_reference).await?;
        tracing::debug!(
            job_id = %job.id,
            width = source.raster.width(),
            height = source.raster.height(),
            format = ?source.format,
            bytes = source.byte_size,
            "Source acquired"
        );

        let mut raster: Arc<DynamicImage> = Arc::new(source.raster);
        let mut results = Vec::with_capacity(job.operations.len());

        for (index, op) in job.operations.iter().enumerate() {
            match self.pipeline.execute(&job.id, Arc::clone(&raster), op).await {
                Ok(applied) => {
                    tracing::debug!(
                        job_id = %job.id,
                        index,
                        operation = %op.kind,
                        key = %applied.result.output_key,
                        "Operation succeeded"
                    );
                    raster = applied.raster;
                    results.push(applied.result);
                }
                Err(e) => {
                    metrics::counter!("image_operations_failed_total", "reason" => e.reason())
                        .increment(1);
                    tracing::warn!(
                        job_id = %job.id,
                        index,
                        operation = %op.kind,
                        error = %e,
                        "Operation failed, skipping"
                    );
                }
            }
        }

        Ok(results)
    }

    async fn persist(&self, job: &Job) -> bool {
        match self.status.save(job).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    status = %job.status,
                    error = %e,
                    "Failed to persist job status"
                );
                false
            }
        }
    }
}
