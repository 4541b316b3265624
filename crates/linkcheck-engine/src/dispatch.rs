//! Work dispatch seam between the decomposer and the workers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use linkcheck_state::{JobId, OwnerId, SubJobId};

use crate::error::EngineResult;

/// Largest batch a single `enqueue` call accepts.
pub const MAX_ENQUEUE_BATCH: usize = 100;

/// One unit of deliverable work: check the URLs of one sub-job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub owner_id: OwnerId,
    pub job_id: JobId,
    pub sub_job_id: SubJobId,
}

impl WorkItem {
    pub fn new(owner_id: &str, job_id: &str, sub_job_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            job_id: job_id.to_string(),
            sub_job_id: sub_job_id.to_string(),
        }
    }
}

/// Delivers work items to workers, at least once and in no particular order.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Enqueue up to [`MAX_ENQUEUE_BATCH`] items.
    async fn enqueue(&self, items: &[WorkItem]) -> EngineResult<()>;
}
