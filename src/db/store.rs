use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::identity::{OwnerId, WorkerId};
use crate::models::job::{Job, JobPatch, JobStatus};
use crate::models::requests::{CompletionReport, FailureReport, SortField, SortOrder};
use crate::models::transition::TransitionLogEntry;
use crate::models::views::StatusCounts;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Outcome of a write guarded by the job's current status.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<T> {
    Applied(T),
    /// No such job, or not visible to the caller.
    Missing,
    /// The job exists but is in another state; nothing was written.
    WrongStatus(JobStatus),
    /// The job is running under another worker's claim.
    NotHolder,
}

/// Clamped listing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub page: u32,
    pub page_size: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl ListFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

pub const COMPLETED_NOTE: &str = "Job completed";
pub const REQUEUED_NOTE: &str = "Lease expired, returned to queue";

pub fn claim_note(worker: &WorkerId) -> String {
    format!("Claimed by worker {worker}")
}

pub fn failure_note(error_message: &str) -> String {
    format!("Job failed: {error_message}")
}

/// Durable job table plus its transition log.
///
/// Every mutating method is a single atomic step: the status check, the
/// field updates and the log entry either all happen or none do, even with
/// concurrent callers in other processes.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Log entries for one job, oldest first.
    async fn transitions(&self, job_id: Uuid) -> Result<Vec<TransitionLogEntry>, StoreError>;

    /// One page of the owner's jobs and the total number matching the filter.
    async fn list(&self, owner: &OwnerId, filter: &ListFilter)
        -> Result<(Vec<Job>, u64), StoreError>;

    /// Move the highest-priority, oldest `pending` job to `running`.
    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lease_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Job>, StoreError>;

    /// `running -> completed`; only the claim holder may.
    async fn complete(
        &self,
        id: Uuid,
        worker: &WorkerId,
        report: &CompletionReport,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError>;

    /// `running -> failed`; only the claim holder may.
    async fn fail(
        &self,
        id: Uuid,
        worker: &WorkerId,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError>;

    /// `pending -> failed`, restricted to the owner.
    async fn cancel(
        &self,
        owner: &OwnerId,
        id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError>;

    /// Edit a `pending` job, restricted to the owner.
    async fn update_pending(
        &self,
        owner: &OwnerId,
        id: Uuid,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError>;

    /// Push the lease of a running job forward; only its claimant may.
    async fn renew_lease(
        &self,
        id: Uuid,
        worker: &WorkerId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError>;

    /// Return every running job whose lease ended before `now` to `pending`.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
