//! Retention sweeper — deletes jobs past their retention age.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::epoch_secs;
use crate::error::{EngineError, EngineResult};
use crate::service::JobService;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Jobs older than this many days are deleted.
    pub max_age_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            max_age_days: 30,
        }
    }
}

/// Periodically removes old jobs together with their sub-jobs.
pub struct RetentionSweeper {
    service: Arc<JobService>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(service: Arc<JobService>, config: RetentionConfig) -> Self {
        Self { service, config }
    }

    /// Delete every job created before `now - max_age_days`.
    ///
    /// Returns the number of jobs deleted. A job disappearing between the
    /// listing and its deletion is not an error.
    pub fn sweep_once(&self, now: u64) -> EngineResult<usize> {
        let cutoff = now.saturating_sub(self.config.max_age_days * SECS_PER_DAY);
        let mut deleted = 0;
        for job in self.service.list_created_before(cutoff)? {
            match self.service.delete(&job.owner_id, &job.id) {
                Ok(()) => deleted += 1,
                Err(EngineError::NotFound(_)) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to delete expired job");
                }
            }
        }
        if deleted > 0 {
            info!(deleted, cutoff, "expired jobs removed");
        }
        Ok(deleted)
    }

    /// Sweep on every tick until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_age_days = self.config.max_age_days,
            "retention sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(epoch_secs()) {
                        error!(error = %e, "retention sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("retention sweeper shutting down");
                    break;
                }
            }
        }
    }
}
