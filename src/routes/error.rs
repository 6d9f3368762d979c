use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::DispatchError;
use crate::models::job::JobStatus;
use crate::services::auth::AuthError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    /// Status the job was found in when a state-guarded write was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<JobStatus>,
}

/// Errors as seen by HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Unauthorized(e.to_string())
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Dispatch(e) => match e {
                DispatchError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                DispatchError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DispatchError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
                DispatchError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                DispatchError::StoreUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
                }
            },
        }
    }

    fn current_status(&self) -> Option<JobStatus> {
        match self {
            ApiError::Dispatch(DispatchError::Conflict { status, .. }) => Some(*status),
            ApiError::Dispatch(DispatchError::InvalidTransition { from, .. }) => Some(*from),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: kind,
            message: self.to_string(),
            current_status: self.current_status(),
        };
        (status, Json(body)).into_response()
    }
}
