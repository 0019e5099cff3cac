//! Job handlers: start, pause, status and per-channel listing.

use super::{JobListResponse, JobStatusResponse, ListJobsQuery, PauseJobRequest, StartJobRequest};
use crate::api::AppState;
use crate::error::{ApiError, Error, JobError, Result};
use crate::types::{JobId, JobStats, JobStatus};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

const DEFAULT_JOB_LIST_LIMIT: u32 = 20;
const MAX_JOB_LIST_LIMIT: u32 = 500;

/// POST /parse/start - Create (or resume) a job and run it in the background
#[utoipa::path(
    post,
    path = "/api/parse/start",
    tag = "parse",
    request_body = StartJobRequest,
    responses(
        (status = 202, description = "Job accepted and running", body = JobStatusResponse),
        (status = 400, description = "Channel missing or invalid settings", body = crate::error::ApiError),
        (status = 503, description = "Engine is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> Response {
    let channel = request.channel.trim();
    if channel.is_empty() {
        return ApiError::validation("channel is required").into_response();
    }

    let job_id = match state
        .engine
        .create_or_resume_job(channel, request.job_config(), request.resume)
        .await
    {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    if state.engine.is_running(&job_id).await {
        tracing::debug!(job_id = %job_id, "Job already has a worker");
    } else {
        let engine = state.engine.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            match engine.run(&id).await {
                Ok(_) | Err(Error::Cancelled) => {}
                Err(Error::Job(JobError::AlreadyRunning { .. })) => {
                    tracing::debug!(job_id = %id, "Job picked up by another worker");
                }
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Background job ended with error"),
            }
        });
    }

    (
        StatusCode::ACCEPTED,
        Json(JobStatusResponse {
            job_id,
            status: JobStatus::Running,
        }),
    )
        .into_response()
}

/// POST /parse/pause - Pause a job
#[utoipa::path(
    post,
    path = "/api/parse/pause",
    tag = "parse",
    request_body = PauseJobRequest,
    responses(
        (status = 200, description = "Job paused", body = JobStatusResponse),
        (status = 400, description = "job_id missing", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job already finished", body = crate::error::ApiError)
    )
)]
pub async fn pause_job(
    State(state): State<AppState>,
    Json(request): Json<PauseJobRequest>,
) -> Response {
    if request.job_id.trim().is_empty() {
        return ApiError::validation("job_id is required").into_response();
    }

    let job_id = JobId::from(request.job_id.trim());
    match state.engine.pause(&job_id).await {
        Ok(()) => Json(JobStatusResponse {
            job_id,
            status: JobStatus::Paused,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /parse/status/:job_id - Job record with progress and duration
#[utoipa::path(
    get,
    path = "/api/parse/status/{job_id}",
    tag = "parse",
    params(("job_id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job details", body = JobStats),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStats>> {
    let stats = state.engine.get_stats(&JobId::from(job_id)).await?;
    Ok(Json(stats))
}

/// GET /parse/jobs/:channel - Most recent jobs of a channel
#[utoipa::path(
    get,
    path = "/api/parse/jobs/{channel}",
    tag = "parse",
    params(
        ("channel" = String, Path, description = "Channel"),
        ListJobsQuery
    ),
    responses(
        (status = 200, description = "Jobs, newest first", body = JobListResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_channel_jobs(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_JOB_LIST_LIMIT)
        .clamp(1, MAX_JOB_LIST_LIMIT);

    let jobs = state.engine.list_jobs(&channel, limit).await?;
    Ok(Json(JobListResponse {
        count: jobs.len(),
        channel,
        jobs,
    }))
}
