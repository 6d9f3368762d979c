use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use super::auth::AuthOwner;
use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::job::Job;
use crate::models::requests::{
    BatchSubmitRequest, CancelJobRequest, ListJobsQuery, SubmitJobRequest, ThreatAnalysisRequest,
    UpdateJobRequest,
};
use crate::models::views::{BatchSubmitResult, JobDetail, JobPage, ThreatAnalysisSubmitted};

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: &'static str,
}

/// Owner-facing routes, mounted under `/api/v1/jobs`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/batch", post(submit_batch))
        .route("/threat-analysis", post(submit_threat_analysis))
        .route("/{job_id}", get(get_job).patch(update_job))
        .route("/{job_id}/cancel", post(cancel_job))
}

/// POST /api/v1/jobs
pub async fn submit_job(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job_id = state.submission.submit(&owner, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id,
            status: "pending",
        }),
    ))
}

/// POST /api/v1/jobs/batch
pub async fn submit_batch(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Json(request): Json<BatchSubmitRequest>,
) -> Result<Json<BatchSubmitResult>, ApiError> {
    let outcome = state.submission.submit_batch(&owner, request.jobs).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/jobs/threat-analysis
pub async fn submit_threat_analysis(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Json(request): Json<ThreatAnalysisRequest>,
) -> Result<(StatusCode, Json<ThreatAnalysisSubmitted>), ApiError> {
    let submitted = state
        .submission
        .submit_threat_analysis(&owner, request)
        .await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobPage>, ApiError> {
    Ok(Json(state.queries.list(&owner, query).await?))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetail>, ApiError> {
    Ok(Json(state.queries.get(&owner, job_id).await?))
}

/// PATCH /api/v1/jobs/{job_id}
pub async fn update_job(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Path(job_id): Path<Uuid>,
    Json(request): Json<UpdateJobRequest>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.owners.update(&owner, job_id, request).await?))
}

/// POST /api/v1/jobs/{job_id}/cancel
///
/// The body is optional; `{"reason": "..."}` is appended to the message.
pub async fn cancel_job(
    State(state): State<AppState>,
    AuthOwner(owner): AuthOwner,
    Path(job_id): Path<Uuid>,
    body: Option<Json<CancelJobRequest>>,
) -> Result<Json<Job>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.owners.cancel(&owner, job_id, request).await?))
}
