use uuid::Uuid;

use crate::db::store::StoreError;
use crate::models::job::JobStatus;

/// Errors surfaced by the dispatch services.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Malformed or out-of-range input. Never retried automatically.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// Owner mutation against a job that already left `pending`.
    #[error("job {job_id} is {status} and can no longer be changed")]
    Conflict { job_id: Uuid, status: JobStatus },

    /// Worker write against a job that is not `running`.
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// Transient persistence failure; no job state is assumed changed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl DispatchError {
    /// True when a retried terminal write found the job already in the state
    /// the caller wanted. Callers treat this as success.
    pub fn is_already_applied(&self, target: JobStatus) -> bool {
        matches!(self, DispatchError::InvalidTransition { from, .. } if *from == target)
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::StoreUnavailable(_))
    }
}

impl From<garde::Report> for DispatchError {
    fn from(report: garde::Report) -> Self {
        DispatchError::Validation(report.to_string())
    }
}
