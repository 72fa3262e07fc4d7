//! Error handling and types

use fairsync::WaitError;
use thiserror::Error;

/// Contention driver errors
#[derive(Error, Debug)]
pub enum DriverError {
    /// A wait or primitive operation failed
    #[error("Wait failed: {0}")]
    Wait(#[from] WaitError),

    /// A worker task panicked or was aborted
    #[error("Worker task failed: {0}")]
    TaskFailed(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<tokio::task::JoinError> for DriverError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::TaskFailed(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
