use chrono::Duration;
use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{
    auth::TokenAuthority, completion::CompletionService, dispatch::DispatchService,
    owner::OwnerService, query::QueryService, submission::SubmissionService,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub auth: Arc<TokenAuthority>,
    pub submission: SubmissionService,
    pub dispatch: DispatchService,
    pub completion: CompletionService,
    pub owners: OwnerService,
    pub queries: QueryService,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, auth: TokenAuthority, lease: Option<Duration>) -> Self {
        Self {
            submission: SubmissionService::new(store.clone()),
            dispatch: DispatchService::new(store.clone(), lease),
            completion: CompletionService::new(store.clone()),
            owners: OwnerService::new(store.clone()),
            queries: QueryService::new(store.clone()),
            auth: Arc::new(auth),
            store,
        }
    }
}
