//! Error types for waits, disposal and the completion pipe

use thiserror::Error;

/// Result type for fairsync operations
pub type Result<T> = std::result::Result<T, WaitError>;

/// Failures surfaced by waits and by the owners of a wait queue
///
/// Precondition failures (`InvalidArgument`, `InvalidOperation`) are reported
/// before any queue mutation. `Disposed`, `TimedOut` and `Canceled` describe
/// how a particular wait ended.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The synchronizer was disposed before or while the caller waited
    #[error("synchronizer has been disposed")]
    Disposed,

    /// The wait timed out (only returned by the error-shaped wait variants)
    #[error("wait timed out")]
    TimedOut,

    /// The wait was canceled by its cancellation token or by a bulk cancel
    #[error("wait was canceled")]
    Canceled,

    /// An argument was rejected before anything was queued
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The call is not valid in the current state of the object
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
}

impl WaitError {
    /// Check if the error reports a disposed synchronizer
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Check if the error reports an expired timeout
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Check if the error reports a cancellation
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
