use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::identity::{OwnerId, WorkerId};
use crate::services::auth::Principal;

/// Caller authenticated with an owner token.
pub struct AuthOwner(pub OwnerId);

/// Caller authenticated with a worker token.
pub struct AuthWorker(pub WorkerId);

fn principal(parts: &Parts, state: &AppState) -> Result<Principal, ApiError> {
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    Ok(state.auth.verify(token.trim())?)
}

impl FromRequestParts<AppState> for AuthOwner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match principal(parts, state)? {
            Principal::Owner(owner) => Ok(AuthOwner(owner)),
            Principal::Worker(_) => Err(ApiError::Forbidden("owner token required")),
        }
    }
}

impl FromRequestParts<AppState> for AuthWorker {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match principal(parts, state)? {
            Principal::Worker(worker) => Ok(AuthWorker(worker)),
            Principal::Owner(_) => Err(ApiError::Forbidden("worker token required")),
        }
    }
}
