use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::AuthWorker;
use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::job::Job;
use crate::models::requests::{CompletionReport, FailureReport};

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub job_id: Uuid,
    pub lease_expires_at: DateTime<Utc>,
}

/// Worker-facing routes, mounted under `/internal/v1/jobs`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/claim", post(claim_job))
        .route("/{job_id}/complete", post(complete_job))
        .route("/{job_id}/fail", post(fail_job))
        .route("/{job_id}/lease", post(renew_lease))
}

/// POST /internal/v1/jobs/claim
///
/// 200 with the job, 204 when the queue is empty.
pub async fn claim_job(
    State(state): State<AppState>,
    AuthWorker(worker): AuthWorker,
) -> Result<Response, ApiError> {
    match state.dispatch.claim_next(&worker).await? {
        Some(claimed) => Ok(Json(claimed).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /internal/v1/jobs/{job_id}/complete
pub async fn complete_job(
    State(state): State<AppState>,
    AuthWorker(worker): AuthWorker,
    Path(job_id): Path<Uuid>,
    Json(report): Json<CompletionReport>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.completion.complete(&worker, job_id, report).await?))
}

/// POST /internal/v1/jobs/{job_id}/fail
pub async fn fail_job(
    State(state): State<AppState>,
    AuthWorker(worker): AuthWorker,
    Path(job_id): Path<Uuid>,
    Json(report): Json<FailureReport>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.completion.fail(&worker, job_id, report).await?))
}

/// POST /internal/v1/jobs/{job_id}/lease
pub async fn renew_lease(
    State(state): State<AppState>,
    AuthWorker(worker): AuthWorker,
    Path(job_id): Path<Uuid>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let lease_expires_at = state.dispatch.renew_lease(&worker, job_id).await?;
    Ok(Json(LeaseResponse {
        job_id,
        lease_expires_at,
    }))
}
