//! Engine error types.

use std::fmt;

use thiserror::Error;

/// Why a job could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity {
    /// More distinct URLs than a single job may hold.
    TooManyUrls { count: usize, max: usize },
    /// The store could not take the job.
    Storage(String),
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::TooManyUrls { count, max } => {
                write!(f, "{count} urls exceeds the limit of {max}")
            }
            Capacity::Storage(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(Capacity),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("probe error: {0}")]
    Probe(#[from] linkcheck_probe::ProbeError),

    #[error("state store error: {0}")]
    State(#[from] linkcheck_state::StateError),
}

pub type EngineResult<T> = Result<T, EngineError>;
