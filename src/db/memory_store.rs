use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{
    claim_note, failure_note, Conditional, JobStore, ListFilter, StoreError, COMPLETED_NOTE,
    REQUEUED_NOTE,
};
use crate::models::identity::{OwnerId, WorkerId, SYSTEM_ACTOR};
use crate::models::job::{Job, JobPatch, JobStatus};
use crate::models::requests::{CompletionReport, FailureReport, SortField, SortOrder};
use crate::models::transition::{NewTransition, TransitionLogEntry};
use crate::models::views::StatusCounts;

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    transitions: Vec<TransitionLogEntry>,
}

impl MemoryState {
    fn log(&mut self, entry: NewTransition) {
        let id = self.transitions.len() as i64 + 1;
        self.transitions.push(entry.with_id(id));
    }

    fn visible_mut(&mut self, id: Uuid, owner: Option<&OwnerId>) -> Option<&mut Job> {
        self.jobs
            .get_mut(&id)
            .filter(|job| owner.is_none_or(|o| job.owner_id == *o))
    }
}

/// In-process job store. Every operation runs under one mutex, which gives
/// the same all-or-nothing behaviour as the database transactions.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

/// Dispatch order: higher priority first, then older, then lower id.
fn dispatch_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

fn listing_order(a: &Job, b: &Job, sort_by: SortField, sort_order: SortOrder) -> Ordering {
    let primary = match sort_by {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Title => a.title.cmp(&b.title),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
    };
    let ordering = primary.then(a.id.cmp(&b.id));
    match sort_order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn miss<T>(job: Option<&Job>) -> Conditional<T> {
    match job {
        Some(job) => Conditional::WrongStatus(job.status),
        None => Conditional::Missing,
    }
}

/// Miss on a write only the claim holder may make.
fn worker_miss<T>(job: Option<&Job>) -> Conditional<T> {
    match job {
        Some(job) if job.status == JobStatus::Running => Conditional::NotHolder,
        other => miss(other),
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Unavailable(format!(
                "duplicate job id {}",
                job.id
            )));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn transitions(&self, job_id: Uuid) -> Result<Vec<TransitionLogEntry>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .transitions
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        owner: &OwnerId,
        filter: &ListFilter,
    ) -> Result<(Vec<Job>, u64), StoreError> {
        let state = self.lock()?;
        let mut matching: Vec<&Job> = state
            .jobs
            .values()
            .filter(|job| job.owner_id == *owner)
            .filter(|job| filter.status.is_none_or(|s| job.status == s))
            .collect();
        matching.sort_by(|a, b| listing_order(a, b, filter.sort_by, filter.sort_order));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lease_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Job>, StoreError> {
        let mut state = self.lock()?;
        let next = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by(|a, b| dispatch_order(a, b))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.mark_running(worker, now, lease_expires_at);
        let claimed = job.clone();

        state.log(NewTransition::new(
            id,
            JobStatus::Pending,
            JobStatus::Running,
            claim_note(worker),
            worker.as_str(),
            now,
        ));
        Ok(Some(claimed))
    }

    async fn complete(
        &self,
        id: Uuid,
        worker: &WorkerId,
        report: &CompletionReport,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut state = self.lock()?;
        let Some(job) = state
            .visible_mut(id, None)
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| job.claimed_by.as_ref() == Some(worker))
        else {
            return Ok(worker_miss(state.jobs.get(&id)));
        };
        job.mark_completed(report, now);
        let completed = job.clone();

        state.log(NewTransition::new(
            id,
            JobStatus::Running,
            JobStatus::Completed,
            COMPLETED_NOTE,
            worker.as_str(),
            now,
        ));
        Ok(Conditional::Applied(completed))
    }

    async fn fail(
        &self,
        id: Uuid,
        worker: &WorkerId,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut state = self.lock()?;
        let Some(job) = state
            .visible_mut(id, None)
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| job.claimed_by.as_ref() == Some(worker))
        else {
            return Ok(worker_miss(state.jobs.get(&id)));
        };
        job.mark_failed(&report.error_message, Some(report.execution_seconds), now);
        let failed = job.clone();

        state.log(NewTransition::new(
            id,
            JobStatus::Running,
            JobStatus::Failed,
            failure_note(&report.error_message),
            worker.as_str(),
            now,
        ));
        Ok(Conditional::Applied(failed))
    }

    async fn cancel(
        &self,
        owner: &OwnerId,
        id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut state = self.lock()?;
        let Some(job) = state
            .visible_mut(id, Some(owner))
            .filter(|job| job.status == JobStatus::Pending)
        else {
            let visible = state.jobs.get(&id).filter(|job| job.owner_id == *owner);
            return Ok(miss(visible));
        };
        job.mark_failed(message, None, now);
        let cancelled = job.clone();

        state.log(NewTransition::new(
            id,
            JobStatus::Pending,
            JobStatus::Failed,
            message,
            owner.as_str(),
            now,
        ));
        Ok(Conditional::Applied(cancelled))
    }

    async fn update_pending(
        &self,
        owner: &OwnerId,
        id: Uuid,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut state = self.lock()?;
        let Some(job) = state
            .visible_mut(id, Some(owner))
            .filter(|job| job.status == JobStatus::Pending)
        else {
            let visible = state.jobs.get(&id).filter(|job| job.owner_id == *owner);
            return Ok(miss(visible));
        };
        job.apply_patch(patch, now);
        Ok(Conditional::Applied(job.clone()))
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        worker: &WorkerId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut state = self.lock()?;
        let Some(job) = state
            .jobs
            .get_mut(&id)
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| job.claimed_by.as_ref() == Some(worker))
        else {
            return Ok(worker_miss(state.jobs.get(&id)));
        };
        job.lease_expires_at = Some(until);
        job.updated_at = now;
        Ok(Conditional::Applied(job.clone()))
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.lock()?;
        let mut reaped = Vec::new();
        for job in state.jobs.values_mut() {
            let expired = job.status == JobStatus::Running
                && job.lease_expires_at.is_some_and(|until| until < now);
            if expired {
                job.requeue(now);
                reaped.push(job.id);
            }
        }
        reaped.sort();
        for id in &reaped {
            state.log(NewTransition::new(
                *id,
                JobStatus::Running,
                JobStatus::Pending,
                REQUEUED_NOTE,
                SYSTEM_ACTOR,
                now,
            ));
        }
        Ok(reaped)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let state = self.lock()?;
        let mut counts = StatusCounts::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
