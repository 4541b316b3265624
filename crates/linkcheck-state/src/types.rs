//! Domain types for the linkcheck state store.
//!
//! These types represent the persisted state of jobs, sub-jobs, URL check
//! records, and runtime settings. All types are serializable to/from JSON
//! for storage in redb tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StateError, StateResult};

/// Tenant namespace a job belongs to.
pub type OwnerId = String;

/// Unique identifier for a job.
pub type JobId = String;

/// Unique identifier for a sub-job within a job.
pub type SubJobId = String;

/// Maximum number of URL checks held by one sub-job.
pub const MAX_URLS_PER_SUB_JOB: usize = 100;

/// Maximum number of distinct URLs accepted for one job.
pub const MAX_URLS_PER_JOB: usize = 15_000;

/// HTTP status code recorded when no response was obtained.
pub const NO_HTTP_STATUS: i32 = -1;

// ── Job ───────────────────────────────────────────────────────────

/// Client-visible batch of URLs to check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    /// Unix timestamp (seconds) when this job was created.
    pub created_at: u64,
    /// Page text that marks an otherwise successful URL as failed.
    #[serde(default)]
    pub failure_match_texts: Vec<String>,
    /// Sub-jobs created at decomposition time, in creation order.
    pub sub_job_ids: Vec<SubJobId>,
    /// Sub-jobs not yet finished.
    pub remaining: u32,
    pub status: JobStatus,
}

/// Derived job status: processing while sub-jobs remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Processing,
    Complete,
}

impl Job {
    /// Create an empty job. With no sub-jobs attached it is already complete.
    pub fn new(owner_id: &str, failure_match_texts: Vec<String>, created_at: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            created_at,
            failure_match_texts,
            sub_job_ids: Vec::new(),
            remaining: 0,
            status: JobStatus::Complete,
        }
    }

    /// Attach freshly created sub-jobs and count them as remaining.
    pub fn add_sub_jobs(&mut self, sub_jobs: &[SubJob]) {
        self.sub_job_ids
            .extend(sub_jobs.iter().map(|s| s.id.clone()));
        self.remaining += sub_jobs.len() as u32;
        if self.remaining > 0 {
            self.status = JobStatus::Processing;
        }
    }

    /// Record one finished sub-job.
    ///
    /// The counter floors at zero so a duplicate completion signal is
    /// harmless. Returns `true` only for the call that flips the job to
    /// complete.
    pub fn complete_one(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.status = JobStatus::Complete;
            return true;
        }
        false
    }

    pub fn is_complete(&self) -> bool {
        self.status == JobStatus::Complete
    }

    /// Build the composite key for the jobs table.
    pub fn table_key(&self) -> String {
        job_key(&self.owner_id, &self.id)
    }
}

/// Composite key for a job: `{owner}/{job_id}`.
pub fn job_key(owner_id: &str, job_id: &str) -> String {
    format!("{owner_id}/{job_id}")
}

/// Composite key for a sub-job: `{owner}/{job_id}/{sub_job_id}`.
pub fn sub_job_key(owner_id: &str, job_id: &str, sub_job_id: &str) -> String {
    format!("{owner_id}/{job_id}/{sub_job_id}")
}

// ── Sub-job ───────────────────────────────────────────────────────

/// Bounded unit of work: the grain of dispatch and retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubJob {
    pub id: SubJobId,
    pub owner_id: OwnerId,
    pub job_id: JobId,
    pub url_checks: Vec<UrlCheckRecord>,
}

impl SubJob {
    /// Create a sub-job for `job` holding one unchecked record per URL.
    pub fn new(job: &Job, urls: Vec<String>) -> StateResult<Self> {
        if urls.len() > MAX_URLS_PER_SUB_JOB {
            return Err(StateError::Invalid(format!(
                "sub-job holds at most {MAX_URLS_PER_SUB_JOB} URLs, got {}",
                urls.len()
            )));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            owner_id: job.owner_id.clone(),
            job_id: job.id.clone(),
            url_checks: urls.into_iter().map(UrlCheckRecord::new).collect(),
        })
    }

    /// Number of records still waiting for a probe.
    pub fn pending_count(&self) -> usize {
        self.url_checks.iter().filter(|r| !r.is_terminal()).count()
    }

    /// Build the composite key for the sub-jobs table.
    pub fn table_key(&self) -> String {
        sub_job_key(&self.owner_id, &self.job_id, &self.id)
    }
}

// ── URL check record ──────────────────────────────────────────────

/// Result of checking a single URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    NotStarted,
    Success,
    Failure,
}

/// One URL inside a sub-job, with the outcome of its check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlCheckRecord {
    pub url: String,
    pub status: CheckStatus,
    pub http_status_code: i32,
    pub message: Option<String>,
}

impl UrlCheckRecord {
    pub fn new(url: String) -> Self {
        Self {
            url,
            status: CheckStatus::NotStarted,
            http_status_code: NO_HTTP_STATUS,
            message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != CheckStatus::NotStarted
    }

    /// Store a probe outcome. Terminal records are never overwritten;
    /// returns whether the outcome was applied.
    pub fn apply(&mut self, outcome: UrlCheckOutcome) -> bool {
        if self.is_terminal() || outcome.status == CheckStatus::NotStarted {
            return false;
        }
        self.status = outcome.status;
        self.http_status_code = outcome.http_status_code;
        self.message = outcome.message;
        true
    }
}

/// Classification produced by a URL probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCheckOutcome {
    pub status: CheckStatus,
    pub http_status_code: i32,
    pub message: Option<String>,
}

impl UrlCheckOutcome {
    pub fn success(http_status_code: i32) -> Self {
        Self {
            status: CheckStatus::Success,
            http_status_code,
            message: None,
        }
    }

    pub fn failure(http_status_code: i32, message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Failure,
            http_status_code,
            message: Some(message.into()),
        }
    }
}

// ── Settings ──────────────────────────────────────────────────────

/// Runtime-tunable settings shared by all workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Target URL checks per minute for one worker.
    pub rate_per_minute: u32,
    /// User-Agent header sent with every probe.
    pub user_agent: String,
}

pub const DEFAULT_RATE_PER_MINUTE: u32 = 60;
pub const DEFAULT_USER_AGENT: &str = "linkcheck";

impl Default for Settings {
    fn default() -> Self {
        Self {
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    /// Merge a partial update. Only fields present in the patch change.
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(rate) = patch.rate_per_minute {
            self.rate_per_minute = rate;
        }
        if let Some(ref agent) = patch.user_agent {
            self.user_agent = agent.clone();
        }
    }
}

/// Partial settings update as received from a client.
///
/// Fields that are not recognised end up in `unknown` so the caller can
/// report them instead of silently dropping them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

// ── Shared key ────────────────────────────────────────────────────

/// Secret clients present in the `Authorization` header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedKey {
    pub key: String,
}

impl SharedKey {
    pub fn random() -> Self {
        Self {
            key: Uuid::new_v4().to_string(),
        }
    }
}
