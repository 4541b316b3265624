//! linkcheck-engine — fan-out/fan-in batch link checking.
//!
//! A job's URL list is split into sub-jobs of at most 100 URLs, each
//! checked by an independent, rate-paced, time-budgeted worker. The last
//! sub-job to finish flips the job to complete, after which results can be
//! aggregated.
//!
//! # Architecture
//!
//! ```text
//! JobService (facade for the API and the retention sweeper)
//!   ├── JobDecomposer ── StateStore (job + sub-jobs, one transaction)
//!   │                └─ Dispatcher (WorkItem batches of ≤ 100)
//!   ├── ResultAggregator (detail view, only once complete)
//!   └── StoreSettings (rate, user agent)
//!
//! TaskQueue (Dispatcher)
//!   └── SubJobWorker ── UrlProbe (per URL, paced by sleep)
//!                    └─ FanInTracker (decrement remaining, flip at zero)
//! ```
//!
//! Delivery is at-least-once. A worker that runs out of time or outbound
//! quota saves its progress and asks to be redelivered; a re-run skips
//! already-classified URLs.

pub mod aggregator;
pub mod decomposer;
pub mod dispatch;
pub mod error;
pub mod fan_in;
pub mod queue;
pub mod retention;
pub mod service;
pub mod settings;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{JobDetail, ResultAggregator};
pub use decomposer::JobDecomposer;
pub use dispatch::{Dispatcher, MAX_ENQUEUE_BATCH, WorkItem};
pub use error::{Capacity, EngineError, EngineResult};
pub use fan_in::FanInTracker;
pub use queue::{QueueConfig, TaskQueue};
pub use retention::{RetentionConfig, RetentionSweeper};
pub use service::JobService;
pub use settings::{SettingsProvider, StoreSettings};
pub use worker::{RunOutcome, SubJobWorker};

/// Current Unix time in seconds.
pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
