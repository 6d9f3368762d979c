use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{Conditional, JobStore};
use crate::error::DispatchError;
use crate::models::identity::WorkerId;
use crate::models::job::JobStatus;
use crate::models::views::ClaimedJob;

/// Hands pending jobs to workers, one claim at a time.
#[derive(Clone)]
pub struct DispatchService {
    store: Arc<dyn JobStore>,
    lease: Option<Duration>,
}

impl DispatchService {
    /// `lease` bounds how long a claim lives without renewal. `None` means
    /// running jobs never expire.
    pub fn new(store: Arc<dyn JobStore>, lease: Option<Duration>) -> Self {
        Self { store, lease }
    }

    /// Claim the next job in dispatch order: highest priority, then oldest,
    /// then lowest id. `Ok(None)` when nothing is pending.
    pub async fn claim_next(&self, worker: &WorkerId) -> Result<Option<ClaimedJob>, DispatchError> {
        let now = Utc::now();
        let lease_expires_at = self.lease.map(|lease| now + lease);

        let Some(job) = self.store.claim_next(worker, now, lease_expires_at).await? else {
            debug!(worker_id = %worker, "No pending jobs");
            return Ok(None);
        };

        metrics::counter!("dispatch_jobs_claimed_total").increment(1);
        info!(
            job_id = %job.id,
            worker_id = %worker,
            priority = job.priority,
            "Job claimed"
        );

        Ok(Some(ClaimedJob::from(&job)))
    }

    /// Extend the claim on a running job. Only the claiming worker may.
    pub async fn renew_lease(
        &self,
        worker: &WorkerId,
        job_id: Uuid,
    ) -> Result<DateTime<Utc>, DispatchError> {
        let Some(lease) = self.lease else {
            return Err(DispatchError::Validation(
                "lease: leases are not enabled on this server".to_string(),
            ));
        };

        let now = Utc::now();
        let until = now + lease;
        match self.store.renew_lease(job_id, worker, until, now).await? {
            Conditional::Applied(_) => {
                debug!(job_id = %job_id, worker_id = %worker, lease_expires_at = %until, "Lease renewed");
                Ok(until)
            }
            Conditional::Missing => Err(DispatchError::NotFound(job_id)),
            Conditional::WrongStatus(status) => Err(DispatchError::InvalidTransition {
                job_id,
                from: status,
                to: JobStatus::Running,
            }),
            Conditional::NotHolder => {
                warn!(job_id = %job_id, worker_id = %worker, "Lease renewal by non-holder rejected");
                Err(DispatchError::InvalidTransition {
                    job_id,
                    from: JobStatus::Running,
                    to: JobStatus::Running,
                })
            }
        }
    }
}
