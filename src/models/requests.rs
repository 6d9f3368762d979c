use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::job::{Document, JobStatus};

const MAX_TAG_LEN: usize = 30;

/// Request to submit one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(length(chars, min = 1, max = 100), custom(not_blank))]
    pub title: String,

    #[serde(default)]
    #[garde(length(chars, max = 500))]
    pub description: String,

    /// 1 (lowest) to 10. Defaults to 1.
    #[garde(range(min = 1, max = 10))]
    pub priority: Option<i32>,

    #[garde(required)]
    pub input: Option<Document>,

    #[serde(default)]
    #[garde(custom(tags_within_limit))]
    pub tags: Vec<String>,

    #[serde(default)]
    #[garde(length(chars, max = 1000))]
    pub notes: String,

    #[garde(length(chars, max = 50))]
    pub source: Option<String>,
}

/// Request to submit several jobs at once.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSubmitRequest {
    pub jobs: Vec<SubmitJobRequest>,
}

/// Owner edits to a pending job.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateJobRequest {
    #[garde(length(chars, min = 1, max = 100), custom(not_blank_opt))]
    pub title: Option<String>,

    #[garde(length(chars, max = 500))]
    pub description: Option<String>,

    #[garde(range(min = 1, max = 10))]
    pub priority: Option<i32>,

    #[garde(length(chars, max = 1000))]
    pub notes: Option<String>,

    #[garde(custom(optional_tags_within_limit))]
    pub tags: Option<Vec<String>>,

    #[garde(skip)]
    pub input: Option<Document>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CancelJobRequest {
    #[garde(length(chars, max = 500))]
    pub reason: Option<String>,
}

/// Threat-analysis submission; expands into a regular job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ThreatAnalysisRequest {
    #[garde(length(chars, min = 1, max = 100), custom(not_blank))]
    pub title: String,

    #[garde(length(chars, max = 500))]
    pub description: Option<String>,

    #[garde(range(min = 1, max = 10))]
    pub priority: Option<i32>,

    #[garde(length(min = 1), inner(length(chars, min = 1, max = 50)))]
    pub data_sources: Vec<String>,

    #[garde(length(chars, min = 1, max = 50))]
    pub threat_type: String,

    #[garde(length(chars, min = 1, max = 20))]
    pub time_window: String,

    #[serde(default)]
    #[garde(skip)]
    pub use_simulator: bool,
}

/// Worker-reported success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CompletionReport {
    #[garde(custom(non_empty_document))]
    pub result: Document,

    #[garde(range(min = 0.0, max = 100.0))]
    pub confidence_score: f64,

    #[garde(skip)]
    pub verdict: bool,

    #[garde(length(chars, min = 1, max = 100))]
    pub backend: String,

    #[garde(range(min = 0))]
    pub execution_seconds: i32,

    #[serde(default = "default_simulation")]
    #[garde(skip)]
    pub is_simulation: bool,
}

/// Worker-reported failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FailureReport {
    #[garde(length(chars, min = 1), custom(not_blank))]
    pub error_message: String,

    #[garde(range(min = 0))]
    pub execution_seconds: i32,
}

fn default_simulation() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Priority,
    Title,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Listing parameters as supplied by the caller; clamped by the query service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

fn not_blank(value: &String, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

fn not_blank_opt(value: &Option<String>, ctx: &()) -> garde::Result {
    match value {
        Some(value) => not_blank(value, ctx),
        None => Ok(()),
    }
}

fn tags_within_limit(value: &Vec<String>, _ctx: &()) -> garde::Result {
    if value.iter().any(|tag| tag.chars().count() > MAX_TAG_LEN) {
        return Err(garde::Error::new(format!(
            "tags must be at most {MAX_TAG_LEN} characters"
        )));
    }
    Ok(())
}

fn optional_tags_within_limit(value: &Option<Vec<String>>, ctx: &()) -> garde::Result {
    match value {
        Some(tags) => tags_within_limit(tags, ctx),
        None => Ok(()),
    }
}

fn non_empty_document(value: &Document, _ctx: &()) -> garde::Result {
    if value.is_empty() {
        return Err(garde::Error::new("must contain at least one field"));
    }
    Ok(())
}
