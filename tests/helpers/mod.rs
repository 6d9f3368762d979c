//! Shared setup for the dispatch integration tests

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;

use job_dispatch::app_state::AppState;
use job_dispatch::db::MemoryJobStore;
use job_dispatch::models::job::Document;
use job_dispatch::models::requests::{CompletionReport, FailureReport, SubmitJobRequest};
use job_dispatch::routes::api_router;
use job_dispatch::services::auth::{Role, TokenAuthority};

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn document(value: Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

pub fn submit_request(title: &str, priority: i32) -> SubmitJobRequest {
    SubmitJobRequest {
        title: title.to_string(),
        priority: Some(priority),
        input: Some(document(json!({"target": title}))),
        ..Default::default()
    }
}

pub fn completion_report() -> CompletionReport {
    CompletionReport {
        result: document(json!({"threat_level": "low", "indicators": 0})),
        confidence_score: 91.0,
        verdict: false,
        backend: "simulator".to_string(),
        execution_seconds: 2,
        is_simulation: true,
    }
}

pub fn failure_report(message: &str) -> FailureReport {
    FailureReport {
        error_message: message.to_string(),
        execution_seconds: 1,
    }
}

/// Application state over a fresh in-memory store.
pub fn memory_state(lease: Option<Duration>) -> (Arc<MemoryJobStore>, AppState) {
    let store = Arc::new(MemoryJobStore::new());
    let state = AppState::new(store.clone(), TokenAuthority::new(TEST_SECRET), lease);
    (store, state)
}

pub fn test_app() -> (Arc<MemoryJobStore>, Router) {
    let (store, state) = memory_state(None);
    (store, api_router(state))
}

pub fn token(subject: &str, role: Role) -> String {
    TokenAuthority::new(TEST_SECRET)
        .issue(subject, role, Duration::minutes(10))
        .expect("token")
}

pub fn owner_token(owner: &str) -> String {
    token(owner, Role::Owner)
}

pub fn worker_token(worker: &str) -> String {
    token(worker, Role::Worker)
}

pub fn json_request(method: &str, uri: &str, bearer: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn empty_request(method: &str, uri: &str, bearer: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .body(Body::empty())
        .expect("request")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
