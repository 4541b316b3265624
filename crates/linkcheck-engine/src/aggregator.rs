//! ResultAggregator — the client-facing view of a job's results.

use serde::{Deserialize, Serialize};

use linkcheck_state::{CheckStatus, JobId, JobStatus, StateStore, UrlCheckRecord, job_key};

use crate::error::{EngineError, EngineResult};

/// Summary of a job. Counts and failures are only filled in once the job
/// is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job_id: JobId,
    pub status: JobStatus,
    pub checked_count: usize,
    pub failures: Vec<UrlCheckRecord>,
}

#[derive(Clone)]
pub struct ResultAggregator {
    store: StateStore,
}

impl ResultAggregator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Build the detail view of a job.
    ///
    /// Failures are listed in sub-job order, then record order.
    pub fn detail(&self, owner_id: &str, job_id: &str) -> EngineResult<JobDetail> {
        let job = self
            .store
            .get_job(owner_id, job_id)?
            .ok_or_else(|| EngineError::NotFound(job_key(owner_id, job_id)))?;

        if !job.is_complete() {
            return Ok(JobDetail {
                job_id: job.id,
                status: job.status,
                checked_count: 0,
                failures: Vec::new(),
            });
        }

        let sub_jobs = self.store.get_sub_jobs(owner_id, job_id, &job.sub_job_ids)?;
        let checked_count = sub_jobs.iter().map(|s| s.url_checks.len()).sum();
        let failures = sub_jobs
            .into_iter()
            .flat_map(|s| s.url_checks)
            .filter(|r| r.status == CheckStatus::Failure)
            .collect();

        Ok(JobDetail {
            job_id: job.id,
            status: job.status,
            checked_count,
            failures,
        })
    }
}
