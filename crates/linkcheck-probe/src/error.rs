//! Error types for URL probing.

use thiserror::Error;

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors a probe reports instead of a URL classification.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The caller's outbound call budget is spent; try again later.
    #[error("outbound call quota exceeded")]
    QuotaExceeded,

    #[error("http client error: {0}")]
    Client(String),
}
