//! TaskQueue — in-process dispatcher for sub-job work.
//!
//! Work items flow through an unbounded mpsc channel into a dispatch loop
//! that runs up to `concurrency` workers at once. A worker asking for a
//! retry is redelivered after an exponential backoff, until the attempt
//! limit is reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, MAX_ENQUEUE_BATCH, WorkItem};
use crate::error::{EngineError, EngineResult};
use crate::worker::{RunOutcome, SubJobWorker};

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Sub-jobs checked at the same time.
    pub concurrency: usize,
    /// Time one delivery may spend before yielding.
    pub time_budget: Duration,
    /// Delay before the first redelivery.
    pub backoff_base: Duration,
    /// Upper bound on the redelivery delay.
    pub backoff_max: Duration,
    /// Deliveries per work item before it is dropped.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            time_budget: Duration::from_secs(570),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_attempts: 50,
        }
    }
}

impl QueueConfig {
    /// Delay before redelivering after `attempt` failed deliveries (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

#[derive(Debug)]
struct Delivery {
    item: WorkItem,
    /// Deliveries already made for this item.
    attempts: u32,
}

/// Handle for enqueuing work. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl TaskQueue {
    /// Spawn the dispatch loop and return a handle to it.
    ///
    /// The loop stops when `shutdown` fires. Deliveries already running
    /// are left to finish on their own.
    pub fn start(
        worker: Arc<SubJobWorker>,
        config: QueueConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self { tx };
        let handle = tokio::spawn(run_dispatch_loop(
            worker,
            config,
            queue.clone(),
            rx,
            shutdown,
        ));
        (queue, handle)
    }

    fn send(&self, delivery: Delivery) -> EngineResult<()> {
        self.tx
            .send(delivery)
            .map_err(|_| EngineError::Dispatch("task queue is shut down".to_string()))
    }
}

#[async_trait]
impl Dispatcher for TaskQueue {
    async fn enqueue(&self, items: &[WorkItem]) -> EngineResult<()> {
        if items.len() > MAX_ENQUEUE_BATCH {
            return Err(EngineError::Dispatch(format!(
                "batch of {} exceeds the limit of {MAX_ENQUEUE_BATCH}",
                items.len()
            )));
        }
        for item in items {
            self.send(Delivery {
                item: item.clone(),
                attempts: 0,
            })?;
        }
        debug!(items = items.len(), "work enqueued");
        Ok(())
    }
}

async fn run_dispatch_loop(
    worker: Arc<SubJobWorker>,
    config: QueueConfig,
    queue: TaskQueue,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let config = Arc::new(config);
    info!(concurrency = config.concurrency, "task queue started");

    loop {
        let delivery = tokio::select! {
            next = rx.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let worker = worker.clone();
        let config = config.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            deliver(&worker, &config, &queue, delivery).await;
            drop(permit);
        });
    }

    info!("task queue stopped");
}

/// Run one delivery and schedule a redelivery if the worker asks for one.
async fn deliver(worker: &SubJobWorker, config: &QueueConfig, queue: &TaskQueue, delivery: Delivery) {
    let Delivery { item, attempts } = delivery;
    let attempts = attempts + 1;

    let outcome = worker
        .run(&item.owner_id, &item.job_id, &item.sub_job_id, config.time_budget)
        .await;
    match outcome {
        Ok(RunOutcome::Finished) | Ok(RunOutcome::Abandoned) => return,
        Ok(RunOutcome::Retry) => {
            debug!(job_id = %item.job_id, sub_job_id = %item.sub_job_id, attempts, "redelivery requested");
        }
        Err(e) => {
            warn!(job_id = %item.job_id, sub_job_id = %item.sub_job_id, attempts, error = %e, "sub-job run failed");
        }
    }

    if attempts >= config.max_attempts {
        error!(
            owner_id = %item.owner_id,
            job_id = %item.job_id,
            sub_job_id = %item.sub_job_id,
            attempts,
            "giving up on sub-job"
        );
        return;
    }

    let delay = config.backoff(attempts);
    let queue = queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = queue.send(Delivery { item, attempts }) {
            debug!(error = %e, "redelivery dropped");
        }
    });
}
