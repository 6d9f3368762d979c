use chrono::Utc;
use garde::Validate;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::JobStore;
use crate::error::DispatchError;
use crate::models::identity::OwnerId;
use crate::models::job::{Document, Job, NewJob};
use crate::models::requests::{SubmitJobRequest, ThreatAnalysisRequest};
use crate::models::views::{BatchFailure, BatchSubmitResult, ThreatAnalysisSubmitted};

/// Priority assigned when the caller gives none.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Largest number of jobs accepted in one batch.
pub const MAX_BATCH_SIZE: usize = 10;

const DEFAULT_SOURCE: &str = "api";
const THREAT_ANALYSIS_SOURCE: &str = "threat_analysis";

/// Rough run time estimates handed back with threat-analysis submissions.
const SIMULATOR_ESTIMATE_SECONDS: u32 = 300;
const HARDWARE_ESTIMATE_SECONDS: u32 = 600;

/// Validates and persists new jobs. Nothing is executed here.
#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Persist one job in `pending` and return its id.
    pub async fn submit(
        &self,
        owner: &OwnerId,
        request: SubmitJobRequest,
    ) -> Result<Uuid, DispatchError> {
        request.validate()?;
        let input = request
            .input
            .ok_or_else(|| DispatchError::Validation("input: is required".to_string()))?;

        let new_job = NewJob {
            title: request.title,
            description: request.description,
            priority: request.priority.unwrap_or(DEFAULT_PRIORITY),
            input,
            tags: request.tags,
            notes: request.notes,
            source: request
                .source
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        };
        let job = Job::pending(owner.clone(), new_job, Utc::now());

        if let Err(e) = self.store.insert(&job).await {
            error!(owner_id = %owner, title = %job.title, error = %e, "Failed to persist job");
            return Err(e.into());
        }

        metrics::counter!("dispatch_jobs_submitted_total").increment(1);
        info!(
            job_id = %job.id,
            owner_id = %owner,
            priority = job.priority,
            source = %job.source,
            "Job submitted"
        );

        Ok(job.id)
    }

    /// Submit each item independently. One bad item never aborts the rest;
    /// its index and reason are reported instead.
    pub async fn submit_batch(
        &self,
        owner: &OwnerId,
        requests: Vec<SubmitJobRequest>,
    ) -> Result<BatchSubmitResult, DispatchError> {
        if requests.is_empty() || requests.len() > MAX_BATCH_SIZE {
            return Err(DispatchError::Validation(format!(
                "jobs: batch must contain between 1 and {MAX_BATCH_SIZE} items"
            )));
        }

        let mut outcome = BatchSubmitResult::default();
        for (index, request) in requests.into_iter().enumerate() {
            match self.submit(owner, request).await {
                Ok(job_id) => {
                    outcome.success_count += 1;
                    outcome.job_ids.push(job_id);
                }
                Err(e) => {
                    warn!(owner_id = %owner, index, error = %e, "Batch item rejected");
                    outcome.failed_count += 1;
                    outcome.failures.push(BatchFailure {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Package a threat-analysis request as a regular job.
    pub async fn submit_threat_analysis(
        &self,
        owner: &OwnerId,
        request: ThreatAnalysisRequest,
    ) -> Result<ThreatAnalysisSubmitted, DispatchError> {
        request.validate()?;

        let mut input = Document::new();
        input.insert("data_sources".to_string(), json!(request.data_sources));
        input.insert("threat_type".to_string(), Value::String(request.threat_type));
        input.insert("time_window".to_string(), Value::String(request.time_window));
        input.insert("use_simulator".to_string(), Value::Bool(request.use_simulator));

        let title = request.title.clone();
        let job_id = self
            .submit(
                owner,
                SubmitJobRequest {
                    title: request.title,
                    description: request.description.unwrap_or_default(),
                    priority: request.priority,
                    input: Some(input),
                    tags: Vec::new(),
                    notes: String::new(),
                    source: Some(THREAT_ANALYSIS_SOURCE.to_string()),
                },
            )
            .await?;

        let estimated_time_seconds = if request.use_simulator {
            SIMULATOR_ESTIMATE_SECONDS
        } else {
            HARDWARE_ESTIMATE_SECONDS
        };

        Ok(ThreatAnalysisSubmitted {
            job_id,
            title,
            estimated_time_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use crate::models::job::JobStatus;

    fn request(title: &str, priority: Option<i32>) -> SubmitJobRequest {
        SubmitJobRequest {
            title: title.to_string(),
            priority,
            input: Some(json!({"target": "10.0.0.1"}).as_object().unwrap().clone()),
            ..Default::default()
        }
    }

    fn service() -> (Arc<MemoryJobStore>, SubmissionService) {
        let store = Arc::new(MemoryJobStore::new());
        (store.clone(), SubmissionService::new(store))
    }

    #[tokio::test]
    async fn test_submit_defaults_priority_and_source() {
        let (store, service) = service();
        let owner = OwnerId::new("alice");

        let id = service.submit(&owner, request("scan", None)).await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.source, "api");
        assert_eq!(job.owner_id, owner);
        assert!(job.started_at.is_none());
        assert!(store.transitions(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_input() {
        let (store, service) = service();
        let owner = OwnerId::new("alice");

        let err = service.submit(&owner, request("", Some(3))).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let err = service.submit(&owner, request("scan", Some(0))).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let mut missing = request("scan", Some(3));
        missing.input = None;
        let err = service.submit(&owner, missing).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        assert_eq!(store.count_by_status().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_batch_reports_partial_failures() {
        let (store, service) = service();
        let owner = OwnerId::new("alice");

        let outcome = service
            .submit_batch(
                &owner,
                vec![
                    request("first", Some(2)),
                    request("", Some(2)),
                    request("third", Some(42)),
                    request("fourth", None),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.job_ids.len(), 2);
        let indexes: Vec<usize> = outcome.failures.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(store.count_by_status().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_batch_size_is_bounded() {
        let (_, service) = service();
        let owner = OwnerId::new("alice");

        assert!(service.submit_batch(&owner, vec![]).await.is_err());
        let too_many = (0..=MAX_BATCH_SIZE).map(|i| request(&format!("job {i}"), None)).collect();
        assert!(service.submit_batch(&owner, too_many).await.is_err());
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_unavailable() {
        let (store, service) = service();
        store.set_unavailable(true);

        let err = service
            .submit(&OwnerId::new("alice"), request("scan", None))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_threat_analysis_builds_input_document() {
        let (store, service) = service();
        let owner = OwnerId::new("alice");

        let submitted = service
            .submit_threat_analysis(
                &owner,
                ThreatAnalysisRequest {
                    title: "Multi-source analysis".to_string(),
                    description: None,
                    priority: Some(7),
                    data_sources: vec!["abuseipdb".to_string(), "hibp".to_string()],
                    threat_type: "malware".to_string(),
                    time_window: "24h".to_string(),
                    use_simulator: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(submitted.estimated_time_seconds, SIMULATOR_ESTIMATE_SECONDS);
        let job = store.get(submitted.job_id).await.unwrap().unwrap();
        assert_eq!(job.source, "threat_analysis");
        assert_eq!(job.priority, 7);
        assert_eq!(job.input["threat_type"], json!("malware"));
        assert_eq!(job.input["data_sources"], json!(["abuseipdb", "hibp"]));
    }
}
