use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{Job, Operation};

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    /// HTTP(S) URL or object-store key of the source image.
    #[garde(length(min = 1, max = 2048), custom(not_blank))]
    #[serde(alias = "image_url")]
    pub source_reference: String,

    #[garde(length(max = 32))]
    #[serde(default)]
    pub operations: Vec<Operation>,
}

fn not_blank(value: &str, _: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

impl SubmitJobRequest {
    /// Build the pending job, falling back to a single 800x600 JPEG resize.
    pub fn into_job(self) -> Job {
        let operations = if self.operations.is_empty() {
            vec![Operation::default_resize()]
        } else {
            self.operations
        };
        Job::new(self.source_reference.trim(), operations)
    }
}

/// Response after a job is admitted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub message: String,
    pub job: Job,
}

/// Error body for the jobs API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
