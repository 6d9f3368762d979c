use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use super::store::{
    claim_note, failure_note, Conditional, JobStore, ListFilter, StoreError, COMPLETED_NOTE,
    REQUEUED_NOTE,
};
use crate::models::identity::{OwnerId, WorkerId, SYSTEM_ACTOR};
use crate::models::job::{Document, Job, JobPatch, JobStatus};
use crate::models::requests::{CompletionReport, FailureReport, SortField, SortOrder};
use crate::models::transition::{NewTransition, TransitionLogEntry};
use crate::models::views::StatusCounts;

const JOB_COLUMNS: &str = "id, owner_id, title, description, notes, tags, source, status, \
    priority, created_at, updated_at, started_at, completed_at, input, result, error_message, \
    confidence_score, verdict, execution_time_seconds, backend, is_simulation, claimed_by, \
    lease_expires_at";

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<JobStatus, StoreError> {
    raw.parse::<JobStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{raw}'")))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    let owner_id: String = row.try_get("owner_id")?;
    let claimed_by: Option<String> = row.try_get("claimed_by")?;
    let input: Json<Document> = row.try_get("input")?;
    let result: Option<Json<Document>> = row.try_get("result")?;

    Ok(Job {
        id: row.try_get("id")?,
        owner_id: OwnerId::new(owner_id),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        notes: row.try_get("notes")?,
        tags: row.try_get("tags")?,
        source: row.try_get("source")?,
        status: parse_status(&status)?,
        priority: row.try_get("priority")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        input: input.0,
        result: result.map(|r| r.0),
        error_message: row.try_get("error_message")?,
        confidence_score: row.try_get("confidence_score")?,
        verdict: row.try_get("verdict")?,
        execution_time_seconds: row.try_get("execution_time_seconds")?,
        backend: row.try_get("backend")?,
        is_simulation: row.try_get("is_simulation")?,
        claimed_by: claimed_by.map(WorkerId::new),
        lease_expires_at: row.try_get("lease_expires_at")?,
    })
}

fn transition_from_row(row: &PgRow) -> Result<TransitionLogEntry, StoreError> {
    let old_status: String = row.try_get("old_status")?;
    let new_status: String = row.try_get("new_status")?;

    Ok(TransitionLogEntry {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        old_status: parse_status(&old_status)?,
        new_status: parse_status(&new_status)?,
        message: row.try_get("message")?,
        actor: row.try_get("actor")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn record_transition(
    conn: &mut PgConnection,
    entry: &NewTransition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_transitions (job_id, old_status, new_status, message, actor, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.job_id)
    .bind(entry.old_status.as_str())
    .bind(entry.new_status.as_str())
    .bind(&entry.message)
    .bind(&entry.actor)
    .bind(entry.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Current status of a job the caller may see, for explaining a write that
/// matched no row.
async fn explain_miss<T>(
    conn: &mut PgConnection,
    id: Uuid,
    owner: Option<&OwnerId>,
) -> Result<Conditional<T>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT status FROM jobs
        WHERE id = $1 AND ($2::text IS NULL OR owner_id = $2)
        "#,
    )
    .bind(id)
    .bind(owner.map(OwnerId::as_str))
    .fetch_optional(conn)
    .await?;

    match row {
        Some(r) => {
            let status: String = r.try_get("status")?;
            Ok(Conditional::WrongStatus(parse_status(&status)?))
        }
        None => Ok(Conditional::Missing),
    }
}

/// Like `explain_miss`, for writes restricted to the claim holder: a job
/// still running matched no row only because another worker holds it.
async fn explain_worker_miss<T>(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Conditional<T>, StoreError> {
    match explain_miss(conn, id, None).await? {
        Conditional::WrongStatus(JobStatus::Running) => Ok(Conditional::NotHolder),
        other => Ok(other),
    }
}

fn order_clause(sort_by: SortField, sort_order: SortOrder) -> String {
    let column = match sort_by {
        SortField::CreatedAt => "created_at",
        SortField::Priority => "priority",
        SortField::Title => "title",
        SortField::Status => "status",
    };
    let direction = match sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!("{column} {direction}, id {direction}")
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, owner_id, title, description, notes, tags, source, status,
                              priority, created_at, updated_at, input, is_simulation)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id.as_str())
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.notes)
        .bind(&job.tags)
        .bind(&job.source)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(Json(&job.input))
        .bind(job.is_simulation)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn transitions(&self, job_id: Uuid) -> Result<Vec<TransitionLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, old_status, new_status, message, actor, created_at
            FROM job_transitions
            WHERE job_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transition_from_row).collect()
    }

    #[instrument(skip(self, filter), fields(owner_id = %owner, page = filter.page))]
    async fn list(
        &self,
        owner: &OwnerId,
        filter: &ListFilter,
    ) -> Result<(Vec<Job>, u64), StoreError> {
        let status = filter.status.map(|s| s.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(owner.as_str())
        .bind(status.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY {} LIMIT $3 OFFSET $4",
            order_clause(filter.sort_by, filter.sort_order)
        );
        let rows = sqlx::query(&sql)
            .bind(owner.as_str())
            .bind(status.as_deref())
            .bind(i64::from(filter.page_size))
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total.max(0) as u64))
    }

    #[instrument(skip(self), fields(worker_id = %worker))]
    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lease_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Rows locked by a concurrent claimer are skipped, and the outer
        // predicate re-checks status, so two claimers never share a job.
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                started_at = $1,
                updated_at = $1,
                claimed_by = $2,
                lease_expires_at = $3
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(worker.as_str())
        .bind(lease_expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let job = job_from_row(&row)?;

        let entry = NewTransition::new(
            job.id,
            JobStatus::Pending,
            JobStatus::Running,
            claim_note(worker),
            worker.as_str(),
            now,
        );
        record_transition(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Some(job))
    }

    #[instrument(skip(self, report), fields(job_id = %id, worker_id = %worker))]
    async fn complete(
        &self,
        id: Uuid,
        worker: &WorkerId,
        report: &CompletionReport,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = $2,
                updated_at = $2,
                result = $3,
                confidence_score = $4,
                verdict = $5,
                backend = $6,
                is_simulation = $7,
                execution_time_seconds = $8,
                lease_expires_at = NULL
            WHERE id = $1 AND status = 'running' AND claimed_by = $9
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(Json(&report.result))
        .bind(report.confidence_score)
        .bind(report.verdict)
        .bind(&report.backend)
        .bind(report.is_simulation)
        .bind(report.execution_seconds)
        .bind(worker.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let outcome = explain_worker_miss(&mut tx, id).await?;
            tx.rollback().await?;
            return Ok(outcome);
        };
        let job = job_from_row(&row)?;

        let entry = NewTransition::new(
            id,
            JobStatus::Running,
            JobStatus::Completed,
            COMPLETED_NOTE,
            worker.as_str(),
            now,
        );
        record_transition(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Conditional::Applied(job))
    }

    #[instrument(skip(self, report), fields(job_id = %id, worker_id = %worker))]
    async fn fail(
        &self,
        id: Uuid,
        worker: &WorkerId,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'failed',
                completed_at = $2,
                updated_at = $2,
                error_message = $3,
                execution_time_seconds = $4,
                lease_expires_at = NULL
            WHERE id = $1 AND status = 'running' AND claimed_by = $5
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(&report.error_message)
        .bind(report.execution_seconds)
        .bind(worker.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let outcome = explain_worker_miss(&mut tx, id).await?;
            tx.rollback().await?;
            return Ok(outcome);
        };
        let job = job_from_row(&row)?;

        let entry = NewTransition::new(
            id,
            JobStatus::Running,
            JobStatus::Failed,
            failure_note(&report.error_message),
            worker.as_str(),
            now,
        );
        record_transition(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Conditional::Applied(job))
    }

    #[instrument(skip(self, message), fields(job_id = %id, owner_id = %owner))]
    async fn cancel(
        &self,
        owner: &OwnerId,
        id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'failed',
                started_at = $3,
                completed_at = $3,
                updated_at = $3,
                error_message = $4
            WHERE id = $1 AND owner_id = $2 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner.as_str())
        .bind(now)
        .bind(message)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let outcome = explain_miss(&mut tx, id, Some(owner)).await?;
            tx.rollback().await?;
            return Ok(outcome);
        };
        let job = job_from_row(&row)?;

        let entry = NewTransition::new(
            id,
            JobStatus::Pending,
            JobStatus::Failed,
            message,
            owner.as_str(),
            now,
        );
        record_transition(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Conditional::Applied(job))
    }

    #[instrument(skip(self, patch), fields(job_id = %id, owner_id = %owner))]
    async fn update_pending(
        &self,
        owner: &OwnerId,
        id: Uuid,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET title = COALESCE($3, title),
                description = COALESCE($4, description),
                priority = COALESCE($5, priority),
                notes = COALESCE($6, notes),
                tags = COALESCE($7, tags),
                input = COALESCE($8, input),
                updated_at = $9
            WHERE id = $1 AND owner_id = $2 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner.as_str())
        .bind(patch.title.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.priority)
        .bind(patch.notes.as_deref())
        .bind(patch.tags.clone())
        .bind(patch.input.as_ref().map(Json))
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Conditional::Applied(job_from_row(&row)?)),
            None => explain_miss(&mut conn, id, Some(owner)).await,
        }
    }

    #[instrument(skip(self), fields(job_id = %id, worker_id = %worker))]
    async fn renew_lease(
        &self,
        id: Uuid,
        worker: &WorkerId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Conditional<Job>, StoreError> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET lease_expires_at = $3, updated_at = $4
            WHERE id = $1 AND status = 'running' AND claimed_by = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker.as_str())
        .bind(until)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            return Ok(Conditional::Applied(job_from_row(&row)?));
        }

        explain_worker_miss(&mut conn, id).await
    }

    #[instrument(skip(self))]
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            WITH expired AS (
                UPDATE jobs
                SET status = 'pending',
                    started_at = NULL,
                    claimed_by = NULL,
                    lease_expires_at = NULL,
                    updated_at = $1
                WHERE status = 'running'
                  AND lease_expires_at IS NOT NULL
                  AND lease_expires_at < $1
                RETURNING id
            )
            INSERT INTO job_transitions (job_id, old_status, new_status, message, actor, created_at)
            SELECT id, 'running', 'pending', $2, $3, $1 FROM expired
            RETURNING job_id
            "#,
        )
        .bind(now)
        .bind(REQUEUED_NOTE)
        .bind(SYSTEM_ACTOR)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            let total = total.max(0) as u64;
            match parse_status(&status)? {
                JobStatus::Pending => counts.pending = total,
                JobStatus::Running => counts.running = total,
                JobStatus::Completed => counts.completed = total,
                JobStatus::Failed => counts.failed = total,
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clause_is_whitelisted() {
        assert_eq!(
            order_clause(SortField::CreatedAt, SortOrder::Desc),
            "created_at DESC, id DESC"
        );
        assert_eq!(
            order_clause(SortField::Priority, SortOrder::Asc),
            "priority ASC, id ASC"
        );
    }

    #[test]
    fn test_parse_status_rejects_unknown() {
        assert_eq!(parse_status("running").unwrap(), JobStatus::Running);
        assert!(matches!(
            parse_status("processing"),
            Err(StoreError::Corrupt(_))
        ));
    }
}
