use job_dispatch::{
    config::WorkerConfig,
    models::job::{Document, JobStatus},
    models::requests::{CompletionReport, FailureReport},
    models::views::ClaimedJob,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const MAX_REPORT_ATTEMPTS: u32 = 3;
const BACKEND: &str = "local-simulator";

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("outcome refused, job is {}", .current.as_ref().map_or("in an unknown state", JobStatus::as_str))]
    Refused { current: Option<JobStatus> },
}

impl WorkerError {
    /// Worth retrying the same request later.
    fn is_transient(&self) -> bool {
        match self {
            WorkerError::Http(_) => true,
            WorkerError::Status { status, .. } => status.is_server_error(),
            WorkerError::Refused { .. } => false,
        }
    }
}

struct DispatchClient {
    http: Client,
    base_url: String,
    token: String,
}

impl DispatchClient {
    fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.worker_token.clone(),
        })
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, WorkerError> {
        let response = self
            .http
            .post(format!("{}/internal/v1/jobs/claim", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(WorkerError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Send a terminal report. `Ok(false)` means the job was already in
    /// `target`, so an earlier attempt recorded this outcome. Any other
    /// refusal is an error.
    async fn report<T: Serialize>(
        &self,
        job_id: Uuid,
        action: &str,
        target: JobStatus,
        body: &T,
    ) -> Result<bool, WorkerError> {
        let response = self
            .http
            .post(format!("{}/internal/v1/jobs/{job_id}/{action}", self.base_url))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::CONFLICT => {
                let current = refused_status(&response.text().await.unwrap_or_default());
                if current == Some(target) {
                    Ok(false)
                } else {
                    Err(WorkerError::Refused { current })
                }
            }
            status => Err(WorkerError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct RefusalBody {
    current_status: Option<JobStatus>,
}

/// Status reported in a 409 body, if the server sent one.
fn refused_status(body: &str) -> Option<JobStatus> {
    serde_json::from_str::<RefusalBody>(body)
        .ok()
        .and_then(|b| b.current_status)
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting dispatch worker");

    // Load configuration
    let config = WorkerConfig::from_env().expect("Failed to load configuration");
    let client = DispatchClient::new(&config).expect("Failed to build HTTP client");

    let base_delay = Duration::from_millis(config.poll_interval_ms.max(1));
    let max_delay = Duration::from_millis(config.max_backoff_ms).max(base_delay);
    let mut delay = base_delay;

    tracing::info!(api = %client.base_url, "Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_next_job(&client).await {
            Ok(true) => {
                delay = base_delay;
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!(delay_ms = delay.as_millis() as u64, "No jobs available, sleeping");
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
            Err(e) => {
                tracing::error!(error = %e, delay_ms = delay.as_millis() as u64, "Claim failed, backing off");
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

/// Claim and run one job.
/// Returns Ok(true) if a job was processed, Ok(false) if none was available.
async fn process_next_job(client: &DispatchClient) -> Result<bool, WorkerError> {
    let Some(job) = client.claim().await? else {
        return Ok(false);
    };

    tracing::info!(
        job_id = %job.job_id,
        title = %job.title,
        priority = job.priority,
        "Processing job"
    );

    let start = Instant::now();
    let outcome = analyze(&job.input);
    let execution_seconds = start.elapsed().as_secs().min(i32::MAX as u64) as i32;

    let delivered = match outcome {
        Ok(analysis) => {
            let report = CompletionReport {
                execution_seconds,
                ..analysis
            };
            deliver(client, job.job_id, "complete", JobStatus::Completed, &report).await
        }
        Err(message) => {
            tracing::warn!(job_id = %job.job_id, error = %message, "Analysis failed");
            let report = FailureReport {
                error_message: message,
                execution_seconds,
            };
            deliver(client, job.job_id, "fail", JobStatus::Failed, &report).await
        }
    };

    if let Err(e) = delivered {
        // The job stays running; a lease, if configured, returns it to the queue.
        tracing::error!(job_id = %job.job_id, error = %e, "Giving up on reporting outcome");
    }

    Ok(true)
}

async fn deliver<T: Serialize>(
    client: &DispatchClient,
    job_id: Uuid,
    action: &str,
    target: JobStatus,
    report: &T,
) -> Result<(), WorkerError> {
    let mut attempt = 1;
    loop {
        match client.report(job_id, action, target, report).await {
            Ok(true) => {
                tracing::info!(job_id = %job_id, action, "Outcome recorded");
                return Ok(());
            }
            Ok(false) => {
                tracing::info!(job_id = %job_id, action, "Outcome already recorded");
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt < MAX_REPORT_ATTEMPTS => {
                tracing::warn!(job_id = %job_id, attempt, error = %e, "Report failed, retrying");
                sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Local stand-in for a real analysis backend. Scores the requested data
/// sources deterministically so repeated runs agree.
fn analyze(input: &Document) -> Result<CompletionReport, String> {
    if input.get("force_failure").and_then(Value::as_bool) == Some(true) {
        return Err("analysis aborted: force_failure requested".to_string());
    }

    let sources: Vec<&str> = input
        .get("data_sources")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let threat_type = input
        .get("threat_type")
        .and_then(Value::as_str)
        .unwrap_or("generic");

    let signal: u32 = sources
        .iter()
        .chain(std::iter::once(&threat_type))
        .flat_map(|s| s.bytes())
        .map(u32::from)
        .sum();
    let confidence_score = 50.0 + f64::from(signal % 50);
    let verdict = confidence_score >= 75.0;

    let mut result = Document::new();
    result.insert("threat_type".to_string(), json!(threat_type));
    result.insert("sources_analyzed".to_string(), json!(sources.len()));
    result.insert(
        "threat_level".to_string(),
        json!(if verdict { "high" } else { "low" }),
    );

    Ok(CompletionReport {
        result,
        confidence_score,
        verdict,
        backend: BACKEND.to_string(),
        execution_seconds: 0,
        is_simulation: true,
    })
}
