use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an image processing job.
///
/// `Pending` is set by the submitter; the worker drives the rest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }
}

/// Kind of transform requested by an operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Resize,
    Format,
    Watermark,
    /// Anything the worker does not understand. Rejected per operation,
    /// so one bad entry does not poison the whole message.
    #[serde(other)]
    Unknown,
}

/// One requested transform. Immutable once the job is admitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    #[serde(alias = "type")]
    pub kind: OperationKind,
    /// Target width; 0 leaves it unconstrained.
    #[serde(default)]
    pub width: i32,
    /// Target height; 0 leaves it unconstrained.
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub format: String,
    /// 1-100 for JPEG/WebP, 0 selects the encoder default.
    #[serde(default)]
    pub quality: i32,
    #[serde(default)]
    pub watermark: String,
    #[serde(default)]
    pub output_key: String,
}

impl Operation {
    /// The operation the API admits when a submission lists none.
    pub fn default_resize() -> Self {
        Self {
            kind: OperationKind::Resize,
            width: 800,
            height: 600,
            format: "jpeg".to_string(),
            quality: 90,
            watermark: String::new(),
            output_key: String::new(),
        }
    }

    pub fn explicit_output_key(&self) -> Option<&str> {
        let key = self.output_key.trim();
        (!key.is_empty()).then_some(key)
    }
}

/// Outcome of one successfully executed operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult {
    pub operation: Operation,
    /// Object key, or a full URL when a public base URL is configured.
    pub output_location: String,
    pub output_key: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
    /// Milliseconds spent transforming, encoding and uploading.
    pub processing_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

/// The job envelope. It travels on the queue and is stored whole in the
/// status store under `job:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(alias = "image_url")]
    pub source_reference: String,
    pub operations: Vec<Operation>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<OperationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Admit a new pending job with a fresh UUID identity.
    pub fn new(source_reference: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            source_reference: source_reference.into(),
            operations,
            created_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Begin a new processing cycle from a delivered envelope.
    ///
    /// Only identity, source, operations and creation time come from the
    /// message; cycle state is cleared so a redelivered message is processed
    /// again from the start.
    pub fn into_delivery_cycle(mut self) -> Self {
        self.status = JobStatus::Pending;
        self.completed_at = None;
        self.results.clear();
        self.error = None;
        self
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::InProgress)
    }

    /// Mark the job completed with whatever results survived.
    pub fn complete(&mut self, results: Vec<OperationResult>) -> Result<(), TransitionError> {
        if results.len() > self.operations.len() {
            return Err(TransitionError::TooManyResults {
                results: results.len(),
                operations: self.operations.len(),
            });
        }
        self.transition(JobStatus::Completed)?;
        self.results = results;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TransitionError {
    #[error("Invalid status transition from {from} to {to}")]
    Invalid { from: JobStatus, to: JobStatus },

    #[error("{results} results exceed {operations} operations")]
    TooManyResults { results: usize, operations: usize },
}
