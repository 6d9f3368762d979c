use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::identity::{OwnerId, WorkerId};
use super::requests::CompletionReport;

/// Opaque structured document. Input and result payloads are never
/// interpreted beyond presence.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A unit of submitted work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub title: String,
    pub description: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub source: String,
    pub status: JobStatus,
    pub priority: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub input: Document,
    pub result: Option<Document>,
    pub error_message: Option<String>,

    pub confidence_score: Option<f64>,
    pub verdict: Option<bool>,
    pub execution_time_seconds: Option<i32>,
    pub backend: Option<String>,
    pub is_simulation: bool,

    pub claimed_by: Option<WorkerId>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// Validated submission, ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub title: String,
    pub description: String,
    pub priority: i32,
    pub input: Document,
    pub tags: Vec<String>,
    pub notes: String,
    pub source: String,
}

/// Owner edits to a job that has not been claimed yet. `None` leaves the
/// field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i32>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub input: Option<Document>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        *self == JobPatch::default()
    }
}

impl Job {
    /// Build a fresh `pending` job. Ids are UUIDv7 so ordering by id follows
    /// submission order.
    pub fn pending(owner_id: OwnerId, new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            title: new_job.title,
            description: new_job.description,
            notes: new_job.notes,
            tags: new_job.tags,
            source: new_job.source,
            status: JobStatus::Pending,
            priority: new_job.priority,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            input: new_job.input,
            result: None,
            error_message: None,
            confidence_score: None,
            verdict: None,
            execution_time_seconds: None,
            backend: None,
            is_simulation: true,
            claimed_by: None,
            lease_expires_at: None,
        }
    }

    pub fn mark_running(
        &mut self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lease_expires_at: Option<DateTime<Utc>>,
    ) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        self.claimed_by = Some(worker.clone());
        self.lease_expires_at = lease_expires_at;
    }

    pub fn mark_completed(&mut self, completion: &CompletionReport, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.result = Some(completion.result.clone());
        self.confidence_score = Some(completion.confidence_score);
        self.verdict = Some(completion.verdict);
        self.backend = Some(completion.backend.clone());
        self.is_simulation = completion.is_simulation;
        self.execution_time_seconds = Some(completion.execution_seconds);
        self.lease_expires_at = None;
    }

    pub fn mark_failed(
        &mut self,
        error_message: &str,
        execution_seconds: Option<i32>,
        now: DateTime<Utc>,
    ) {
        self.status = JobStatus::Failed;
        // Cancelled jobs were never started.
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.completed_at = Some(now);
        self.updated_at = now;
        self.error_message = Some(error_message.to_string());
        self.execution_time_seconds = execution_seconds;
        self.lease_expires_at = None;
    }

    /// Return a running job whose lease lapsed to the queue.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.updated_at = now;
        self.claimed_by = None;
        self.lease_expires_at = None;
    }

    pub fn apply_patch(&mut self, patch: &JobPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(input) = &patch.input {
            self.input = input.clone();
        }
        self.updated_at = now;
    }

    /// Wall-clock time between claim and terminal transition.
    pub fn execution_duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    /// First lifecycle invariant this job breaks, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        let started = self.started_at.is_some();
        let completed = self.completed_at.is_some();
        let has_error = self.error_message.as_deref().is_some_and(|m| !m.is_empty());
        let has_result = self.result.as_ref().is_some_and(|r| !r.is_empty());

        if started != (self.status != JobStatus::Pending) {
            return Some("started_at must be set exactly when the job left pending");
        }
        if completed != self.status.is_terminal() {
            return Some("completed_at must be set exactly when the job is terminal");
        }
        if has_error != (self.status == JobStatus::Failed) {
            return Some("error_message must be set exactly when the job failed");
        }
        if has_result != (self.status == JobStatus::Completed) {
            return Some("result must be set exactly when the job completed");
        }
        None
    }
}
