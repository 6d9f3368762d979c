use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use uuid::Uuid;

use crate::db::JobStore;
use crate::error::DispatchError;

/// Returns running jobs with lapsed leases to the queue.
#[derive(Clone)]
pub struct LeaseReaper {
    store: Arc<dyn JobStore>,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// One sweep. Each requeued job gets a log entry attributed to `system`.
    pub async fn reap_once(&self) -> Result<Vec<Uuid>, DispatchError> {
        let reaped = self.store.reap_expired(Utc::now()).await?;
        if !reaped.is_empty() {
            metrics::counter!("dispatch_jobs_requeued_total").increment(reaped.len() as u64);
            info!(count = reaped.len(), job_ids = ?reaped, "Requeued jobs with expired leases");
        }
        Ok(reaped)
    }

    /// Sweep forever on a fixed period. Store errors are logged and the next
    /// tick tries again.
    pub async fn run(self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reap_once().await {
                error!(error = %e, "Lease sweep failed");
            }
        }
    }
}
