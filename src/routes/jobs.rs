use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::Job;
use crate::models::submission::{ErrorResponse, SubmitJobRequest, SubmitJobResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// POST /api/v1/jobs — admit an image processing job.
///
/// The pending record is written to the status store before the job is
/// enqueued, so a status query never races ahead of admission.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    request
        .validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let job = request.into_job();

    state.status.save(&job).await.map_err(|e| {
        tracing::error!(job_id = %job.id, error = %e, "Failed to save job");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save job")
    })?;

    state.queue.enqueue(&job).await.map_err(|e| {
        tracing::error!(job_id = %job.id, error = %e, "Failed to publish job");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to publish job")
    })?;

    metrics::counter!("image_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job.id,
        source = %job.source_reference,
        operations = job.operations.len(),
        "Job submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            message: "Job created successfully".to_string(),
            job,
        }),
    ))
}

/// GET /api/v1/jobs/{job_id} — current job envelope, or 404 when the record
/// was never written or has expired.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.status.load(&job_id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "job not found")),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to get job",
            ))
        }
    }
}
