//! JobDecomposer — turns a URL list into a job and its sub-jobs.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use linkcheck_state::{
    Job, JobId, MAX_URLS_PER_JOB, MAX_URLS_PER_SUB_JOB, StateStore, SubJob,
};

use crate::dispatch::{Dispatcher, MAX_ENQUEUE_BATCH, WorkItem};
use crate::epoch_secs;
use crate::error::{Capacity, EngineError, EngineResult};

/// Creates jobs and hands their sub-jobs to the dispatcher.
pub struct JobDecomposer {
    store: StateStore,
    dispatcher: Arc<dyn Dispatcher>,
}

impl JobDecomposer {
    pub fn new(store: StateStore, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Create a job over the distinct URLs in `urls`.
    ///
    /// The job and all its sub-jobs are persisted together; nothing is
    /// dispatched unless that write succeeds. Dispatch failures after the
    /// write are logged and do not fail the call.
    pub async fn create_job(
        &self,
        owner_id: &str,
        urls: Vec<String>,
        failure_match_texts: Vec<String>,
    ) -> EngineResult<JobId> {
        let distinct: Vec<String> = urls
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if distinct.len() > MAX_URLS_PER_JOB {
            return Err(EngineError::CapacityExceeded(Capacity::TooManyUrls {
                count: distinct.len(),
                max: MAX_URLS_PER_JOB,
            }));
        }

        let mut job = Job::new(owner_id, failure_match_texts, epoch_secs());
        let sub_jobs = distinct
            .chunks(MAX_URLS_PER_SUB_JOB)
            .map(|chunk| SubJob::new(&job, chunk.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        job.add_sub_jobs(&sub_jobs);

        if let Err(e) = self.store.put_job_with_sub_jobs(&job, &sub_jobs) {
            if e.is_storage_failure() {
                warn!(%owner_id, error = %e, "job could not be stored");
                return Err(EngineError::CapacityExceeded(Capacity::Storage(
                    e.to_string(),
                )));
            }
            return Err(e.into());
        }

        info!(
            %owner_id,
            job_id = %job.id,
            urls = distinct.len(),
            sub_jobs = sub_jobs.len(),
            "job created"
        );

        let items: Vec<WorkItem> = sub_jobs
            .iter()
            .map(|s| WorkItem::new(owner_id, &job.id, &s.id))
            .collect();
        for batch in items.chunks(MAX_ENQUEUE_BATCH) {
            if let Err(e) = self.dispatcher.enqueue(batch).await {
                warn!(
                    %owner_id,
                    job_id = %job.id,
                    items = batch.len(),
                    error = %e,
                    "failed to dispatch sub-jobs"
                );
            }
        }

        Ok(job.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDispatcher, urls};
    use linkcheck_state::JobStatus;

    fn decomposer(store: &StateStore, dispatcher: Arc<RecordingDispatcher>) -> JobDecomposer {
        JobDecomposer::new(store.clone(), dispatcher)
    }

    #[tokio::test]
    async fn splits_into_bounded_sub_jobs() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());

        let job_id = decomposer(&store, dispatcher.clone())
            .create_job("acct", urls(250), vec!["out of stock".to_string()])
            .await
            .unwrap();

        let job = store.get_job("acct", &job_id).unwrap().unwrap();
        assert_eq!(job.sub_job_ids.len(), 3);
        assert_eq!(job.remaining, 3);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.failure_match_texts, vec!["out of stock".to_string()]);

        let subs = store.get_sub_jobs("acct", &job_id, &job.sub_job_ids).unwrap();
        assert!(subs.iter().all(|s| s.url_checks.len() <= MAX_URLS_PER_SUB_JOB));
        let total: usize = subs.iter().map(|s| s.url_checks.len()).sum();
        assert_eq!(total, 250);
        assert!(subs.iter().all(|s| s.pending_count() == s.url_checks.len()));
    }

    #[tokio::test]
    async fn duplicates_are_collapsed() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let mut input = urls(150);
        input.extend(urls(150));

        let job_id = decomposer(&store, dispatcher)
            .create_job("acct", input, Vec::new())
            .await
            .unwrap();

        let job = store.get_job("acct", &job_id).unwrap().unwrap();
        let subs = store.get_sub_jobs("acct", &job_id, &job.sub_job_ids).unwrap();
        let seen: HashSet<String> = subs
            .iter()
            .flat_map(|s| s.url_checks.iter().map(|r| r.url.clone()))
            .collect();
        assert_eq!(subs.len(), 2);
        assert_eq!(seen.len(), 150);
    }

    #[tokio::test]
    async fn every_sub_job_is_dispatched_in_bounded_batches() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());

        let job_id = decomposer(&store, dispatcher.clone())
            .create_job("acct", urls(12_345), Vec::new())
            .await
            .unwrap();

        let job = store.get_job("acct", &job_id).unwrap().unwrap();
        assert_eq!(job.sub_job_ids.len(), 124);

        let batches = dispatcher.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() <= MAX_ENQUEUE_BATCH));

        let dispatched: Vec<String> = dispatcher
            .items()
            .into_iter()
            .map(|item| {
                assert_eq!(item.owner_id, "acct");
                assert_eq!(item.job_id, job_id);
                item.sub_job_id
            })
            .collect();
        assert_eq!(dispatched, job.sub_job_ids);
    }

    #[tokio::test]
    async fn too_many_urls_creates_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());

        let result = decomposer(&store, dispatcher.clone())
            .create_job("acct", urls(MAX_URLS_PER_JOB + 1), Vec::new())
            .await;

        assert!(matches!(
            result,
            Err(EngineError::CapacityExceeded(Capacity::TooManyUrls { .. }))
        ));
        assert!(store.list_jobs("acct").unwrap().is_empty());
        assert!(dispatcher.batches().is_empty());
    }

    #[tokio::test]
    async fn exactly_the_limit_is_accepted() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());

        let job_id = decomposer(&store, dispatcher)
            .create_job("acct", urls(MAX_URLS_PER_JOB), Vec::new())
            .await
            .unwrap();

        let job = store.get_job("acct", &job_id).unwrap().unwrap();
        assert_eq!(job.sub_job_ids.len(), MAX_URLS_PER_JOB / MAX_URLS_PER_SUB_JOB);
    }

    #[tokio::test]
    async fn empty_url_list_is_complete_immediately() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());

        let job_id = decomposer(&store, dispatcher.clone())
            .create_job("acct", Vec::new(), Vec::new())
            .await
            .unwrap();

        let job = store.get_job("acct", &job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.remaining, 0);
        assert!(dispatcher.batches().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_still_returns_the_job() {
        let store = StateStore::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::failing());

        let job_id = decomposer(&store, dispatcher.clone())
            .create_job("acct", urls(10), Vec::new())
            .await
            .unwrap();

        assert!(store.get_job("acct", &job_id).unwrap().is_some());
        assert_eq!(dispatcher.batches().len(), 1);
    }
}
