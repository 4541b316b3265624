//! Fan-in: counting finished sub-jobs against their parent job.

use tracing::info;

use linkcheck_state::{FanIn, Job, StateError, StateStore, SubJob, job_key};

use crate::error::{EngineError, EngineResult};

/// Records sub-job completions. The only path by which a job becomes
/// complete after creation.
#[derive(Clone)]
pub struct FanInTracker {
    store: StateStore,
}

impl FanInTracker {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Record that one sub-job of the job has finished.
    ///
    /// Safe to call more than once for the same sub-job: the counter never
    /// goes below zero and a complete job stays complete.
    pub fn complete_one(&self, owner_id: &str, job_id: &str) -> EngineResult<Job> {
        match self.store.complete_one(owner_id, job_id) {
            Ok(FanIn { job, completed_now }) => {
                if completed_now {
                    info!(%owner_id, %job_id, sub_jobs = job.sub_job_ids.len(), "job complete");
                }
                Ok(job)
            }
            Err(StateError::NotFound(_)) => Err(EngineError::NotFound(job_key(owner_id, job_id))),
            Err(e) => Err(e.into()),
        }
    }

    /// Save a sub-job whose records are all classified and count it
    /// against its job, atomically.
    pub fn finish(&self, sub_job: &SubJob) -> EngineResult<Job> {
        let (owner_id, job_id) = (&sub_job.owner_id, &sub_job.job_id);
        match self.store.finish_sub_job(sub_job) {
            Ok(FanIn { job, completed_now }) => {
                if completed_now {
                    info!(%owner_id, %job_id, sub_jobs = job.sub_job_ids.len(), "job complete");
                }
                Ok(job)
            }
            Err(StateError::NotFound(_)) => Err(EngineError::NotFound(job_key(owner_id, job_id))),
            Err(e) => Err(e.into()),
        }
    }
}
