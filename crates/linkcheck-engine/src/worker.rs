//! SubJobWorker — checks the URLs of one sub-job.
//!
//! A single invocation walks the sub-job's records in order, probing each
//! one not yet classified. Checks are paced so one worker stays near
//! `rate_per_minute`, and the invocation gives up the slot once its time
//! budget is spent. Progress is saved before yielding, so a redelivery
//! only probes what is left.
//!
//! ```text
//! LOADED → RUNNING ─┬─ all records terminal ──→ FINISHED (saved and fanned in atomically)
//!                   ├─ budget spent ──────────→ RETRY (saved)
//!                   └─ outbound quota spent ──→ RETRY (saved if progressed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use linkcheck_probe::{ProbeError, UrlProbe};
use linkcheck_state::{StateError, StateStore, SubJob};

use crate::error::{EngineError, EngineResult};
use crate::fan_in::FanInTracker;
use crate::settings::SettingsProvider;

/// Pacing sleeps shorter than this are skipped.
const MIN_PACING_SLEEP: Duration = Duration::from_millis(50);

/// How a worker invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every record is classified and the parent job was told.
    Finished,
    /// Work remains; redeliver later.
    Retry,
    /// The sub-job or its job no longer exists. Nothing to do.
    Abandoned,
}

/// Runs sub-jobs. Cheap to share between concurrent deliveries.
pub struct SubJobWorker {
    store: StateStore,
    probe: Arc<dyn UrlProbe>,
    settings: Arc<dyn SettingsProvider>,
    fan_in: FanInTracker,
}

impl SubJobWorker {
    pub fn new(
        store: StateStore,
        probe: Arc<dyn UrlProbe>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let fan_in = FanInTracker::new(store.clone());
        Self {
            store,
            probe,
            settings,
            fan_in,
        }
    }

    /// Check the pending URLs of one sub-job within `time_budget`.
    pub async fn run(
        &self,
        owner_id: &str,
        job_id: &str,
        sub_job_id: &str,
        time_budget: Duration,
    ) -> EngineResult<RunOutcome> {
        let Some(mut sub_job) = self.store.get_sub_job(owner_id, job_id, sub_job_id)? else {
            info!(%owner_id, %job_id, %sub_job_id, "sub-job gone, abandoning");
            return Ok(RunOutcome::Abandoned);
        };
        let Some(job) = self.store.get_job(owner_id, job_id)? else {
            info!(%owner_id, %job_id, %sub_job_id, "job gone, abandoning");
            return Ok(RunOutcome::Abandoned);
        };
        let settings = self.settings.current().await?;
        let interval = interval_per_url(settings.rate_per_minute)?;

        debug!(
            %job_id,
            %sub_job_id,
            pending = sub_job.pending_count(),
            rate_per_minute = settings.rate_per_minute,
            "sub-job run starting"
        );

        let start = Instant::now();
        let mut checked: u32 = 0;

        for index in 0..sub_job.url_checks.len() {
            if start.elapsed() > time_budget {
                debug!(%job_id, %sub_job_id, checked, "time budget spent, suspending");
                return self.save(&sub_job, RunOutcome::Retry);
            }
            if sub_job.url_checks[index].is_terminal() {
                continue;
            }

            let url = sub_job.url_checks[index].url.clone();
            let outcome = match self
                .probe
                .probe(&url, &job.failure_match_texts, &settings.user_agent)
                .await
            {
                Ok(outcome) => outcome,
                Err(ProbeError::QuotaExceeded) => {
                    warn!(%job_id, %sub_job_id, checked, "outbound quota exhausted, suspending");
                    if checked == 0 {
                        return Ok(RunOutcome::Retry);
                    }
                    return self.save(&sub_job, RunOutcome::Retry);
                }
                Err(e) => {
                    if checked > 0 {
                        self.save(&sub_job, RunOutcome::Retry)?;
                    }
                    return Err(e.into());
                }
            };
            sub_job.url_checks[index].apply(outcome);
            checked += 1;

            // Stay at or below the configured rate.
            let due = interval.saturating_mul(checked);
            if let Some(time_in_hand) = due.checked_sub(start.elapsed()) {
                if time_in_hand > MIN_PACING_SLEEP {
                    tokio::time::sleep(time_in_hand).await;
                }
            }
        }

        // The final save and the fan-in commit together.
        match self.fan_in.finish(&sub_job) {
            Ok(_) => {}
            Err(EngineError::NotFound(_)) => {
                info!(%job_id, %sub_job_id, "job deleted mid-run, abandoning");
                return Ok(RunOutcome::Abandoned);
            }
            Err(e) => return Err(e),
        }

        info!(%job_id, %sub_job_id, checked, "sub-job finished");
        Ok(RunOutcome::Finished)
    }

    /// Persist progress, downgrading to `Abandoned` if the job was deleted.
    fn save(&self, sub_job: &SubJob, outcome: RunOutcome) -> EngineResult<RunOutcome> {
        match self.store.put_sub_job(sub_job) {
            Ok(()) => Ok(outcome),
            Err(StateError::NotFound(_)) => {
                info!(job_id = %sub_job.job_id, sub_job_id = %sub_job.id, "job deleted mid-run, abandoning");
                Ok(RunOutcome::Abandoned)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Target spacing between two checks at the given rate.
fn interval_per_url(rate_per_minute: u32) -> EngineResult<Duration> {
    if rate_per_minute == 0 {
        return Err(EngineError::Validation(
            "rate_per_minute must be positive".to_string(),
        ));
    }
    Ok(Duration::from_secs(60) / rate_per_minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedSettings, ScriptedProbe, urls};
    use async_trait::async_trait;
    use linkcheck_probe::ProbeResult;
    use linkcheck_state::{CheckStatus, Job, JobStatus, Settings, UrlCheckOutcome};

    /// Deletes the job while one of its URLs is being checked.
    struct DeletingProbe {
        store: StateStore,
        job_id: String,
    }

    #[async_trait]
    impl UrlProbe for DeletingProbe {
        async fn probe(
            &self,
            _url: &str,
            _failure_match_texts: &[String],
            _user_agent: &str,
        ) -> ProbeResult<UrlCheckOutcome> {
            self.store.delete_job("acct", &self.job_id).unwrap();
            Ok(UrlCheckOutcome::success(200))
        }
    }

    const BUDGET: Duration = Duration::from_secs(570);

    fn settings(rate_per_minute: u32) -> Arc<FixedSettings> {
        Arc::new(FixedSettings(Settings {
            rate_per_minute,
            ..Settings::default()
        }))
    }

    /// Store a job with a single sub-job over `urls`.
    fn stored(store: &StateStore, urls: Vec<String>) -> (Job, SubJob) {
        let mut job = Job::new("acct", Vec::new(), 1000);
        let sub = SubJob::new(&job, urls).unwrap();
        job.add_sub_jobs(std::slice::from_ref(&sub));
        store.put_job_with_sub_jobs(&job, std::slice::from_ref(&sub)).unwrap();
        (job, sub)
    }

    fn worker(store: &StateStore, probe: Arc<ScriptedProbe>, rate: u32) -> SubJobWorker {
        SubJobWorker::new(store.clone(), probe, settings(rate))
    }

    #[test]
    fn interval_follows_rate() {
        assert_eq!(interval_per_url(60).unwrap(), Duration::from_secs(1));
        assert_eq!(interval_per_url(120).unwrap(), Duration::from_millis(500));
        assert!(interval_per_url(0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn finishes_and_fans_in() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(5));
        let probe = Arc::new(ScriptedProbe::new().failing("https://example.com/page/3"));
        let worker = worker(&store, probe.clone(), 600);

        let outcome = worker.run("acct", &job.id, &sub.id, BUDGET).await.unwrap();
        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(probe.calls().len(), 5);

        let saved = store.get_sub_job("acct", &job.id, &sub.id).unwrap().unwrap();
        assert_eq!(saved.pending_count(), 0);
        assert_eq!(saved.url_checks[3].status, CheckStatus::Failure);
        assert_eq!(saved.url_checks[3].http_status_code, 404);

        let job = store.get_job("acct", &job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_saves_and_retries_without_fan_in() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(20));
        let probe = Arc::new(ScriptedProbe::new());
        let worker = worker(&store, probe.clone(), 60);

        let outcome = worker
            .run("acct", &job.id, &sub.id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Retry);

        let checked = probe.calls().len();
        assert!((9..=11).contains(&checked), "checked {checked} urls");

        let saved = store.get_sub_job("acct", &job.id, &sub.id).unwrap().unwrap();
        assert_eq!(saved.pending_count(), 20 - checked);

        let job = store.get_job("acct", &job.id).unwrap().unwrap();
        assert_eq!(job.remaining, 1);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spreads_checks_over_the_interval() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(5));
        let worker = worker(&store, Arc::new(ScriptedProbe::new()), 60);

        let start = Instant::now();
        worker.run("acct", &job.id, &sub.id, BUDGET).await.unwrap();

        // One check per second, the last one followed by its own interval.
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_checks_only_remaining_urls() {
        let store = StateStore::open_in_memory().unwrap();
        let all = urls(6);
        let (job, sub) = stored(&store, all.clone());

        let first = Arc::new(ScriptedProbe::new().with_quota(4));
        let outcome = worker(&store, first.clone(), 600)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Retry);
        assert_eq!(first.calls(), all[..4].to_vec());

        let second = Arc::new(ScriptedProbe::new());
        let outcome = worker(&store, second.clone(), 600)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(second.calls(), all[4..].to_vec());

        let job = store.get_job("acct", &job.id).unwrap().unwrap();
        assert_eq!(job.remaining, 0);
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhausted_before_any_check_saves_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(3));
        let probe = Arc::new(ScriptedProbe::new().with_quota(0));

        let outcome = worker(&store, probe, 60)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Retry);

        let saved = store.get_sub_job("acct", &job.id, &sub.id).unwrap().unwrap();
        assert_eq!(saved, sub);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_of_finished_sub_job_probes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(2));

        worker(&store, Arc::new(ScriptedProbe::new()), 600)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await
            .unwrap();

        let probe = Arc::new(ScriptedProbe::new());
        let outcome = worker(&store, probe.clone(), 600)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Finished);
        assert!(probe.calls().is_empty());

        let job = store.get_job("acct", &job.id).unwrap().unwrap();
        assert_eq!(job.remaining, 0);
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_job_is_abandoned() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(2));
        store.delete_job("acct", &job.id).unwrap();

        let probe = Arc::new(ScriptedProbe::new());
        let outcome = worker(&store, probe.clone(), 60)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Abandoned);
        assert!(probe.calls().is_empty());
        assert!(store.get_job("acct", &job.id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn job_deleted_during_last_check_is_abandoned_without_writes() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(1));
        let probe = Arc::new(DeletingProbe {
            store: store.clone(),
            job_id: job.id.clone(),
        });
        let worker = SubJobWorker::new(store.clone(), probe, settings(600));

        let outcome = worker.run("acct", &job.id, &sub.id, BUDGET).await.unwrap();
        assert_eq!(outcome, RunOutcome::Abandoned);
        assert!(store.get_job("acct", &job.id).unwrap().is_none());
        assert!(store.get_sub_job("acct", &job.id, &sub.id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let (job, sub) = stored(&store, urls(1));

        let result = worker(&store, Arc::new(ScriptedProbe::new()), 0)
            .run("acct", &job.id, &sub.id, BUDGET)
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
