mod helpers;

use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use helpers::{completion_report, submit_request};
use job_dispatch::{
    app_state::AppState,
    config::AppConfig,
    db::{self, JobStore, PgJobStore},
    models::identity::{OwnerId, WorkerId},
    models::job::JobStatus,
    models::requests::CancelJobRequest,
    services::{auth::TokenAuthority, reaper::LeaseReaper},
};

/// Connect to the database named by `DATABASE_URL` and apply migrations.
///
/// Note: these tests require a running PostgreSQL instance configured via
/// environment variables. Each test uses a unique owner so runs do not
/// interfere, but the claim tests assume no other process is claiming.
async fn pg_store() -> Arc<PgJobStore> {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Arc::new(PgJobStore::new(pool))
}

async fn drain(state: &AppState) {
    let worker = WorkerId::new("drain");
    while let Some(job) = state.dispatch.claim_next(&worker).await.expect("claim") {
        state
            .completion
            .complete(&worker, job.job_id, completion_report())
            .await
            .expect("complete");
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_postgres_lifecycle() {
    let store = pg_store().await;
    let state = AppState::new(store.clone(), TokenAuthority::new("it"), None);
    drain(&state).await;

    let owner = OwnerId::new(format!("owner-{}", uuid::Uuid::now_v7()));
    let worker = WorkerId::new("pg-worker");

    let low = state.submission.submit(&owner, submit_request("low", 1)).await.unwrap();
    let high = state.submission.submit(&owner, submit_request("high", 8)).await.unwrap();
    let cancelled = state.submission.submit(&owner, submit_request("cancel", 9)).await.unwrap();
    state
        .owners
        .cancel(&owner, cancelled, CancelJobRequest::default())
        .await
        .unwrap();

    let first = state.dispatch.claim_next(&worker).await.unwrap().unwrap();
    assert_eq!(first.job_id, high);
    state
        .completion
        .complete(&worker, high, completion_report())
        .await
        .unwrap();
    let replay = state
        .completion
        .complete(&worker, high, completion_report())
        .await
        .unwrap_err();
    assert!(replay.is_already_applied(JobStatus::Completed));

    let second = state.dispatch.claim_next(&worker).await.unwrap().unwrap();
    assert_eq!(second.job_id, low);

    let detail = state.queries.get(&owner, high).await.unwrap();
    assert_eq!(detail.job.status, JobStatus::Completed);
    assert_eq!(detail.logs.len(), 2);
    assert!(detail.job.invariant_violation().is_none());

    let cancelled_job = store.get(cancelled).await.unwrap().unwrap();
    assert_eq!(cancelled_job.status, JobStatus::Failed);
    assert!(cancelled_job.invariant_violation().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_postgres_concurrent_claims_are_exclusive() {
    let store = pg_store().await;
    let state = AppState::new(store.clone(), TokenAuthority::new("it"), None);
    drain(&state).await;

    let owner = OwnerId::new(format!("owner-{}", uuid::Uuid::now_v7()));
    for i in 0..30 {
        state
            .submission
            .submit(&owner, submit_request(&format!("job {i}"), (i % 10) + 1))
            .await
            .unwrap();
    }

    let handles = (0..6).map(|w| {
        let dispatch = state.dispatch.clone();
        tokio::spawn(async move {
            let worker = WorkerId::new(format!("pg-{w}"));
            let mut claimed = Vec::new();
            while let Some(job) = dispatch.claim_next(&worker).await.unwrap() {
                claimed.push(job.job_id);
            }
            claimed
        })
    });

    let claims: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .flat_map(|h| h.unwrap())
        .collect();
    let unique: HashSet<_> = claims.iter().collect();
    assert_eq!(claims.len(), 30);
    assert_eq!(unique.len(), 30);
}

#[tokio::test]
#[ignore]
async fn test_postgres_reaps_expired_leases() {
    let store = pg_store().await;
    let state = AppState::new(store.clone(), TokenAuthority::new("it"), None);
    drain(&state).await;

    let owner = OwnerId::new(format!("owner-{}", uuid::Uuid::now_v7()));
    let id = state.submission.submit(&owner, submit_request("lease", 5)).await.unwrap();

    let now = Utc::now();
    store
        .claim_next(&WorkerId::new("stalled"), now, Some(now - Duration::seconds(1)))
        .await
        .unwrap()
        .unwrap();

    let reaped = LeaseReaper::new(store.clone()).reap_once().await.unwrap();
    assert!(reaped.contains(&id));

    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.started_at.is_none());
    let logs = store.transitions(id).await.unwrap();
    assert_eq!(logs.last().unwrap().actor, "system");
}

#[tokio::test]
#[ignore]
async fn test_postgres_rejects_outcome_from_previous_claimant() {
    let store = pg_store().await;
    let state = AppState::new(store.clone(), TokenAuthority::new("it"), None);
    drain(&state).await;

    let owner = OwnerId::new(format!("owner-{}", uuid::Uuid::now_v7()));
    let id = state.submission.submit(&owner, submit_request("stale", 5)).await.unwrap();

    let now = Utc::now();
    let stalled = WorkerId::new("pg-stalled");
    let healthy = WorkerId::new("pg-healthy");
    store
        .claim_next(&stalled, now, Some(now - Duration::seconds(1)))
        .await
        .unwrap()
        .unwrap();
    LeaseReaper::new(store.clone()).reap_once().await.unwrap();
    let reclaimed = state.dispatch.claim_next(&healthy).await.unwrap().unwrap();
    assert_eq!(reclaimed.job_id, id);

    let stale = state
        .completion
        .complete(&stalled, id, completion_report())
        .await
        .unwrap_err();
    assert!(!stale.is_already_applied(JobStatus::Completed));
    assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Running);

    state
        .completion
        .complete(&healthy, id, completion_report())
        .await
        .unwrap();
    let logs = store.transitions(id).await.unwrap();
    assert_eq!(logs.last().unwrap().actor, "pg-healthy");
}
