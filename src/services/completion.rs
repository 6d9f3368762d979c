use chrono::Utc;
use garde::Validate;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{Conditional, JobStore};
use crate::error::DispatchError;
use crate::models::identity::WorkerId;
use crate::models::job::{Job, JobStatus};
use crate::models::requests::{CompletionReport, FailureReport};

/// Records worker outcomes. A job reaches a terminal state at most once;
/// replays are answered with `InvalidTransition` and change nothing.
#[derive(Clone)]
pub struct CompletionService {
    store: Arc<dyn JobStore>,
}

impl CompletionService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// `running -> completed`.
    pub async fn complete(
        &self,
        worker: &WorkerId,
        job_id: Uuid,
        report: CompletionReport,
    ) -> Result<Job, DispatchError> {
        report.validate()?;

        let outcome = self
            .store
            .complete(job_id, worker, &report, Utc::now())
            .await
            .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to record completion"))?;
        let job = settle(outcome, job_id, JobStatus::Completed)?;

        metrics::counter!("dispatch_jobs_completed_total").increment(1);
        record_execution_time(report.execution_seconds);
        info!(
            job_id = %job_id,
            worker_id = %worker,
            verdict = report.verdict,
            confidence = report.confidence_score,
            backend = %report.backend,
            wall_clock = ?job.execution_duration(),
            "Job completed"
        );

        Ok(job)
    }

    /// `running -> failed`.
    pub async fn fail(
        &self,
        worker: &WorkerId,
        job_id: Uuid,
        report: FailureReport,
    ) -> Result<Job, DispatchError> {
        report.validate()?;

        let outcome = self
            .store
            .fail(job_id, worker, &report, Utc::now())
            .await
            .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to record failure"))?;
        let job = settle(outcome, job_id, JobStatus::Failed)?;

        metrics::counter!("dispatch_jobs_failed_total").increment(1);
        record_execution_time(report.execution_seconds);
        warn!(
            job_id = %job_id,
            worker_id = %worker,
            error_message = %report.error_message,
            "Job failed"
        );

        Ok(job)
    }
}

fn settle(outcome: Conditional<Job>, job_id: Uuid, to: JobStatus) -> Result<Job, DispatchError> {
    match outcome {
        Conditional::Applied(job) => Ok(job),
        Conditional::Missing => Err(DispatchError::NotFound(job_id)),
        Conditional::WrongStatus(from) => {
            info!(job_id = %job_id, from = %from, to = %to, "Terminal write rejected");
            Err(DispatchError::InvalidTransition { job_id, from, to })
        }
        Conditional::NotHolder => {
            warn!(job_id = %job_id, to = %to, "Terminal write from a worker that no longer holds the job");
            Err(DispatchError::InvalidTransition {
                job_id,
                from: JobStatus::Running,
                to,
            })
        }
    }
}

fn record_execution_time(reported_seconds: i32) {
    metrics::histogram!("dispatch_job_execution_seconds").record(f64::from(reported_seconds));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use crate::models::identity::OwnerId;
    use crate::models::job::NewJob;
    use serde_json::json;

    fn report() -> CompletionReport {
        CompletionReport {
            result: json!({"threat_level": "high"}).as_object().unwrap().clone(),
            confidence_score: 87.5,
            verdict: true,
            backend: "simulator".to_string(),
            execution_seconds: 12,
            is_simulation: true,
        }
    }

    async fn running_job(store: &MemoryJobStore) -> Uuid {
        let job = Job::pending(
            OwnerId::new("alice"),
            NewJob {
                title: "scan".to_string(),
                description: String::new(),
                priority: 1,
                input: json!({"n": 1}).as_object().unwrap().clone(),
                tags: Vec::new(),
                notes: String::new(),
                source: "api".to_string(),
            },
            Utc::now(),
        );
        store.insert(&job).await.unwrap();
        store
            .claim_next(&WorkerId::new("w1"), Utc::now(), None)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_complete_is_applied_once() {
        let store = Arc::new(MemoryJobStore::new());
        let id = running_job(&store).await;
        let service = CompletionService::new(store.clone());
        let worker = WorkerId::new("w1");

        let job = service.complete(&worker, id, report()).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.confidence_score, Some(87.5));
        assert!(job.invariant_violation().is_none());

        let replay = service.complete(&worker, id, report()).await.unwrap_err();
        assert!(replay.is_already_applied(JobStatus::Completed));

        let late_failure = service
            .fail(
                &worker,
                id,
                FailureReport {
                    error_message: "timeout".to_string(),
                    execution_seconds: 3,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            late_failure,
            DispatchError::InvalidTransition { from: JobStatus::Completed, to: JobStatus::Failed, .. }
        ));

        assert_eq!(store.transitions(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_records_message() {
        let store = Arc::new(MemoryJobStore::new());
        let id = running_job(&store).await;
        let service = CompletionService::new(store.clone());

        let job = service
            .fail(
                &WorkerId::new("w1"),
                id,
                FailureReport {
                    error_message: "backend unreachable".to_string(),
                    execution_seconds: 4,
                },
            )
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("backend unreachable"));
        assert!(job.result.is_none());
        assert!(job.invariant_violation().is_none());
    }

    #[tokio::test]
    async fn test_complete_unknown_job_is_not_found() {
        let service = CompletionService::new(Arc::new(MemoryJobStore::new()));
        let err = service
            .complete(&WorkerId::new("w1"), Uuid::now_v7(), report())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_report_changes_nothing() {
        let store = Arc::new(MemoryJobStore::new());
        let id = running_job(&store).await;
        let service = CompletionService::new(store.clone());

        let mut empty = report();
        empty.result.clear();
        let err = service.complete(&WorkerId::new("w1"), id, empty).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Running);
    }
}
