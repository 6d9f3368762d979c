use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobStatus;

/// Immutable audit record of one status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub id: i64,
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub message: String,
    /// `system`, a worker id, or an owner id.
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// A log entry before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub message: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl NewTransition {
    pub fn new(
        job_id: Uuid,
        old_status: JobStatus,
        new_status: JobStatus,
        message: impl Into<String>,
        actor: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            old_status,
            new_status,
            message: message.into(),
            actor: actor.into(),
            created_at,
        }
    }

    pub fn with_id(self, id: i64) -> TransitionLogEntry {
        TransitionLogEntry {
            id,
            job_id: self.job_id,
            old_status: self.old_status,
            new_status: self.new_status,
            message: self.message,
            actor: self.actor,
            created_at: self.created_at,
        }
    }
}
