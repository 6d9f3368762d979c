use chrono::Utc;
use garde::Validate;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::{Conditional, JobStore};
use crate::error::DispatchError;
use crate::models::identity::OwnerId;
use crate::models::job::{Job, JobPatch};
use crate::models::requests::{CancelJobRequest, UpdateJobRequest};

const CANCEL_MESSAGE: &str = "Task cancelled by user";

/// Owner-initiated changes. Both operations only apply while the job is
/// still `pending`; afterwards they are rejected with `Conflict`.
#[derive(Clone)]
pub struct OwnerService {
    store: Arc<dyn JobStore>,
}

impl OwnerService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Move a pending job straight to `failed` with a cancellation message.
    pub async fn cancel(
        &self,
        owner: &OwnerId,
        job_id: Uuid,
        request: CancelJobRequest,
    ) -> Result<Job, DispatchError> {
        request.validate()?;
        let message = cancel_message(request.reason.as_deref());

        let outcome = self
            .store
            .cancel(owner, job_id, &message, Utc::now())
            .await
            .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to cancel job"))?;
        let job = settle(outcome, job_id)?;

        metrics::counter!("dispatch_jobs_cancelled_total").increment(1);
        info!(job_id = %job_id, owner_id = %owner, "Job cancelled");
        Ok(job)
    }

    /// Apply the supplied fields to a pending job. Fields left out are kept.
    pub async fn update(
        &self,
        owner: &OwnerId,
        job_id: Uuid,
        request: UpdateJobRequest,
    ) -> Result<Job, DispatchError> {
        request.validate()?;
        let patch = JobPatch {
            title: request.title,
            description: request.description,
            priority: request.priority,
            notes: request.notes,
            tags: request.tags,
            input: request.input,
        };

        let outcome = self
            .store
            .update_pending(owner, job_id, &patch, Utc::now())
            .await
            .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to update job"))?;
        let job = settle(outcome, job_id)?;

        info!(job_id = %job_id, owner_id = %owner, empty_patch = patch.is_empty(), "Job updated");
        Ok(job)
    }
}

fn cancel_message(reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("{CANCEL_MESSAGE}: {reason}"),
        None => CANCEL_MESSAGE.to_string(),
    }
}

fn settle(outcome: Conditional<Job>, job_id: Uuid) -> Result<Job, DispatchError> {
    match outcome {
        Conditional::Applied(job) => Ok(job),
        Conditional::Missing | Conditional::NotHolder => Err(DispatchError::NotFound(job_id)),
        Conditional::WrongStatus(status) => Err(DispatchError::Conflict { job_id, status }),
    }
}
