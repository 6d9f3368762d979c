use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::db::{JobStore, ListFilter};
use crate::error::DispatchError;
use crate::models::identity::OwnerId;
use crate::models::requests::ListJobsQuery;
use crate::models::views::{JobDetail, JobPage, PaginationInfo, StatusCounts};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Read-only views over an owner's jobs.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn JobStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// One job plus its transition log, oldest entry first. Jobs owned by
    /// someone else are reported as missing.
    pub async fn get(&self, owner: &OwnerId, job_id: Uuid) -> Result<JobDetail, DispatchError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .filter(|job| job.owner_id == *owner)
            .ok_or(DispatchError::NotFound(job_id))?;
        let logs = self.store.transitions(job_id).await?;

        Ok(JobDetail { job, logs })
    }

    /// A page of the owner's jobs. Out-of-range paging values are clamped
    /// rather than rejected.
    pub async fn list(&self, owner: &OwnerId, query: ListJobsQuery) -> Result<JobPage, DispatchError> {
        let filter = clamp(query);
        let (items, total) = self.store.list(owner, &filter).await?;
        debug!(
            owner_id = %owner,
            page = filter.page,
            page_size = filter.page_size,
            total,
            "Listed jobs"
        );

        Ok(JobPage {
            items,
            pagination: PaginationInfo::new(filter.page, filter.page_size, total),
        })
    }

    /// Queue-wide counts, used by the health endpoint.
    pub async fn status_counts(&self) -> Result<StatusCounts, DispatchError> {
        Ok(self.store.count_by_status().await?)
    }
}

fn clamp(query: ListJobsQuery) -> ListFilter {
    ListFilter {
        status: query.status,
        page: query.page.unwrap_or(1).max(1),
        page_size: query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use crate::models::identity::WorkerId;
    use crate::models::job::{Job, JobStatus, NewJob};
    use crate::models::requests::{SortField, SortOrder};
    use chrono::{Duration, Utc};
    use serde_json::json;

    async fn seed(store: &MemoryJobStore, owner: &str, count: usize) -> Vec<Uuid> {
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..count {
            let job = Job::pending(
                OwnerId::new(owner),
                NewJob {
                    title: format!("job {i:02}"),
                    description: String::new(),
                    priority: (i % 10) as i32 + 1,
                    input: json!({"i": i}).as_object().unwrap().clone(),
                    tags: Vec::new(),
                    notes: String::new(),
                    source: "api".to_string(),
                },
                base + Duration::seconds(i as i64),
            );
            store.insert(&job).await.unwrap();
            ids.push(job.id);
        }
        ids
    }

    #[test]
    fn test_clamp_bounds_paging() {
        let filter = clamp(ListJobsQuery {
            page: Some(0),
            page_size: Some(1000),
            ..Default::default()
        });
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, MAX_PAGE_SIZE);
        assert_eq!(filter.sort_by, SortField::CreatedAt);
        assert_eq!(filter.sort_order, SortOrder::Desc);

        let filter = clamp(ListJobsQuery {
            page_size: Some(0),
            ..Default::default()
        });
        assert_eq!(filter.page_size, 1);
        assert_eq!(clamp(ListJobsQuery::default()).page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_list_defaults_to_newest_first() {
        let store = Arc::new(MemoryJobStore::new());
        let ids = seed(&store, "alice", 3).await;
        seed(&store, "bob", 2).await;
        let service = QueryService::new(store);

        let page = service
            .list(&OwnerId::new("alice"), ListJobsQuery::default())
            .await
            .unwrap();
        let listed: Vec<Uuid> = page.items.iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(page.pagination.total, 3);
        assert!(!page.pagination.has_next);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = Arc::new(MemoryJobStore::new());
        seed(&store, "alice", 4).await;
        store
            .claim_next(&WorkerId::new("w1"), Utc::now(), None)
            .await
            .unwrap();
        let service = QueryService::new(store);

        let page = service
            .list(
                &OwnerId::new("alice"),
                ListJobsQuery {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_get_hides_other_owners_jobs() {
        let store = Arc::new(MemoryJobStore::new());
        let ids = seed(&store, "alice", 1).await;
        let service = QueryService::new(store);

        let detail = service.get(&OwnerId::new("alice"), ids[0]).await.unwrap();
        assert_eq!(detail.job.id, ids[0]);
        assert!(detail.logs.is_empty());

        let err = service.get(&OwnerId::new("bob"), ids[0]).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
