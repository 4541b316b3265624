//! JobService — the operations exposed to the API layer and the sweeper.

use std::sync::Arc;

use tracing::{info, warn};

use linkcheck_state::{
    Job, JobId, Settings, SettingsPatch, SharedKey, StateStore, job_key,
};

use crate::aggregator::{JobDetail, ResultAggregator};
use crate::decomposer::JobDecomposer;
use crate::dispatch::{Dispatcher, MAX_ENQUEUE_BATCH, WorkItem};
use crate::error::{EngineError, EngineResult};
use crate::settings::StoreSettings;

/// Facade over the engine components for one store and one dispatcher.
pub struct JobService {
    store: StateStore,
    dispatcher: Arc<dyn Dispatcher>,
    decomposer: JobDecomposer,
    aggregator: ResultAggregator,
    settings: StoreSettings,
}

impl JobService {
    pub fn new(store: StateStore, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            decomposer: JobDecomposer::new(store.clone(), dispatcher.clone()),
            aggregator: ResultAggregator::new(store.clone()),
            settings: StoreSettings::new(store.clone()),
            dispatcher,
            store,
        }
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub async fn create_job(
        &self,
        owner_id: &str,
        urls: Vec<String>,
        failure_match_texts: Vec<String>,
    ) -> EngineResult<JobId> {
        validate_owner_id(owner_id)?;
        self.decomposer
            .create_job(owner_id, urls, failure_match_texts)
            .await
    }

    pub fn detail(&self, owner_id: &str, job_id: &str) -> EngineResult<JobDetail> {
        validate_owner_id(owner_id)?;
        self.aggregator.detail(owner_id, job_id)
    }

    /// All jobs of an owner, in key order.
    pub fn list(&self, owner_id: &str) -> EngineResult<Vec<Job>> {
        validate_owner_id(owner_id)?;
        Ok(self.store.list_jobs(owner_id)?)
    }

    /// Delete a job and its sub-jobs. Workers still holding one of its
    /// sub-jobs abandon it on their next save.
    pub fn delete(&self, owner_id: &str, job_id: &str) -> EngineResult<()> {
        validate_owner_id(owner_id)?;
        if !self.store.delete_job(owner_id, job_id)? {
            return Err(EngineError::NotFound(job_key(owner_id, job_id)));
        }
        info!(%owner_id, %job_id, "job deleted");
        Ok(())
    }

    /// Jobs of every owner created before `cutoff` (Unix seconds).
    pub fn list_created_before(&self, cutoff: u64) -> EngineResult<Vec<Job>> {
        Ok(self.store.list_jobs_created_before(cutoff)?)
    }

    /// Re-dispatch the unfinished sub-jobs of every processing job.
    ///
    /// Used at startup, since the in-process queue does not survive a
    /// restart. Sub-jobs whose records are all classified are skipped so
    /// they are not counted twice. Returns the number of items dispatched.
    pub async fn resume_pending(&self) -> EngineResult<usize> {
        let mut items = Vec::new();
        for job in self.store.list_processing_jobs()? {
            let sub_jobs = self
                .store
                .get_sub_jobs(&job.owner_id, &job.id, &job.sub_job_ids)?;
            items.extend(
                sub_jobs
                    .iter()
                    .filter(|s| s.pending_count() > 0)
                    .map(|s| WorkItem::new(&s.owner_id, &s.job_id, &s.id)),
            );
        }

        for batch in items.chunks(MAX_ENQUEUE_BATCH) {
            if let Err(e) = self.dispatcher.enqueue(batch).await {
                warn!(items = batch.len(), error = %e, "failed to resume sub-jobs");
            }
        }
        if !items.is_empty() {
            info!(sub_jobs = items.len(), "pending sub-jobs resumed");
        }
        Ok(items.len())
    }

    // ── Settings ───────────────────────────────────────────────────

    pub fn get_settings(&self) -> EngineResult<Settings> {
        self.settings.load()
    }

    pub fn update_settings(&self, patch: &SettingsPatch) -> EngineResult<Settings> {
        self.settings.update(patch)
    }

    // ── Shared key ─────────────────────────────────────────────────

    /// The key clients must present, generated and stored on first use.
    pub fn shared_key(&self) -> EngineResult<SharedKey> {
        if let Some(key) = self.store.get_shared_key()? {
            return Ok(key);
        }
        let key = SharedKey::random();
        self.store.put_shared_key(&key)?;
        info!("shared key generated");
        Ok(key)
    }

    /// Replace the stored key with a fixed one.
    pub fn pin_shared_key(&self, key: &str) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::Validation("shared key must not be empty".to_string()));
        }
        self.store.put_shared_key(&SharedKey {
            key: key.to_string(),
        })?;
        Ok(())
    }
}

/// Owner ids become key prefixes, so they must be non-empty and free of
/// the key separator.
fn validate_owner_id(owner_id: &str) -> EngineResult<()> {
    if owner_id.is_empty() || owner_id.contains('/') {
        return Err(EngineError::Validation(format!(
            "invalid owner id: {owner_id:?}"
        )));
    }
    Ok(())
}
