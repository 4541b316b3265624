//! linkcheck-state — embedded state store for linkcheck.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for jobs, sub-jobs, runtime settings, and the shared API key.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{owner}/{job_id}`, `{owner}/{job_id}/{sub_job_id}`)
//! enable prefix scans for an owner's jobs and a job's sub-jobs.
//!
//! A job and all its sub-jobs are written in one write transaction, and the
//! fan-in decrement runs as a read-modify-write inside a single write
//! transaction. redb admits one writer at a time, which is what serializes
//! concurrent completions of the same job.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{FanIn, StateStore};
pub use types::*;
