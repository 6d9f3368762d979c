use axum::routing::get;
use axum::Router;

use crate::app_state::AppState;

pub mod auth;
pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod worker;

/// Health, owner and worker routes. The Prometheus endpoint and the
/// transport layers are added by the server binary.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1/jobs", jobs::router())
        .nest("/internal/v1/jobs", worker::router())
        .with_state(state)
}
