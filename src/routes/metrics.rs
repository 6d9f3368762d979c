use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition of the dispatch counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the services emit.
pub fn describe_metrics() {
    ::metrics::describe_counter!("dispatch_jobs_submitted_total", "Jobs accepted into the queue");
    ::metrics::describe_counter!("dispatch_jobs_claimed_total", "Jobs handed to a worker");
    ::metrics::describe_counter!("dispatch_jobs_completed_total", "Jobs that finished successfully");
    ::metrics::describe_counter!("dispatch_jobs_failed_total", "Jobs reported as failed by a worker");
    ::metrics::describe_counter!("dispatch_jobs_cancelled_total", "Pending jobs cancelled by their owner");
    ::metrics::describe_counter!(
        "dispatch_jobs_requeued_total",
        "Running jobs returned to the queue after their lease expired"
    );
    ::metrics::describe_histogram!(
        "dispatch_job_execution_seconds",
        ::metrics::Unit::Seconds,
        "Worker-reported execution time of finished jobs"
    );
    ::metrics::describe_gauge!("dispatch_pending_jobs", "Jobs waiting to be claimed");
}
