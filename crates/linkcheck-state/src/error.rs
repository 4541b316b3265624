//! Error types for the linkcheck state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    Invalid(String),
}

impl StateError {
    /// Whether the error came from the storage layer itself (I/O, commit,
    /// quota) rather than from the data being stored or looked up.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StateError::Open(_)
                | StateError::Transaction(_)
                | StateError::Table(_)
                | StateError::Read(_)
                | StateError::Write(_)
        )
    }
}
