//! Wait and construction options
//!
//! [`WaitOptions`] carries the per-call timeout, cancellation token and
//! caller tag. [`SyncOptions`] configures a synchronizer when it is built.

use crate::diagnostics::{CallerTag, SyncCounters};
use crate::error::{Result, WaitError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a caller is willing to stay suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait until resolved by a release, cancellation or disposal
    #[default]
    Infinite,
    /// Give up after the duration; `Duration::ZERO` never queues
    After(Duration),
}

impl Timeout {
    /// Never queue: fail immediately when the resource is unavailable
    pub const ZERO: Self = Self::After(Duration::ZERO);

    /// Build a timeout from signed milliseconds
    ///
    /// `-1` denotes an infinite timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::InvalidArgument`] for any other negative value.
    pub fn from_millis(millis: i64) -> Result<Self> {
        match millis {
            -1 => Ok(Self::Infinite),
            m if m < 0 => Err(WaitError::InvalidArgument("timeout must be non-negative or -1")),
            m => Ok(Self::After(Duration::from_millis(m.unsigned_abs()))),
        }
    }

    /// Check if this timeout forbids queueing
    #[must_use]
    pub fn is_zero(&self) -> bool {
        matches!(self, Self::After(d) if d.is_zero())
    }

    /// The duration to wait, `None` when infinite
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(*d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// Per-call wait parameters
///
/// ```rust
/// use fairsync::{Timeout, WaitOptions};
/// use std::time::Duration;
///
/// let options = WaitOptions::new()
///     .timeout(Duration::from_millis(250))
///     .tag("ingest-worker-3");
/// assert_eq!(options.timeout, Timeout::After(Duration::from_millis(250)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Timeout for the wait
    pub timeout: Timeout,
    /// Optional cancellation signal
    pub cancellation: Option<CancellationToken>,
    /// Caller identity recorded when caller tracking is enabled
    pub tag: Option<CallerTag>,
}

impl WaitOptions {
    /// Infinite timeout, no cancellation, no tag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail-fast options: never queue
    #[must_use]
    pub fn immediate() -> Self {
        Self::new().timeout(Timeout::ZERO)
    }

    /// Set the timeout
    ///
    /// A finite timeout on a wait that has to queue is timed by tokio; such
    /// a wait fails with [`WaitError::InvalidOperation`] outside a tokio
    /// runtime.
    ///
    /// [`WaitError::InvalidOperation`]: crate::WaitError::InvalidOperation
    #[must_use]
    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Set the cancellation token
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Tag this wait with caller-identifying information
    #[must_use]
    pub fn tag(mut self, tag: impl Into<CallerTag>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub(crate) fn is_cancellation_requested(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Construction options shared by every primitive
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Contention and wait-duration counters
    pub counters: Option<Arc<SyncCounters>>,
    /// Record caller tags of suspended waiters
    pub track_callers: bool,
    /// Number of waiter nodes to preallocate
    pub initial_capacity: usize,
}

impl SyncOptions {
    /// No counters, no tracking
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report contention and wait durations into `counters`
    #[must_use]
    pub fn counters(mut self, counters: Arc<SyncCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Enable or disable caller tracking
    #[must_use]
    pub const fn track_callers(mut self, enabled: bool) -> Self {
        self.track_callers = enabled;
        self
    }

    /// Preallocate waiter nodes
    #[must_use]
    pub const fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(Timeout::from_millis(-1), Ok(Timeout::Infinite));
        assert_eq!(
            Timeout::from_millis(0),
            Ok(Timeout::After(Duration::ZERO))
        );
        assert_eq!(
            Timeout::from_millis(1500),
            Ok(Timeout::After(Duration::from_millis(1500)))
        );
        assert!(matches!(
            Timeout::from_millis(-2),
            Err(WaitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_timeout_zero() {
        assert!(Timeout::ZERO.is_zero());
        assert!(!Timeout::Infinite.is_zero());
        assert_eq!(Timeout::Infinite.duration(), None);
    }

    #[test]
    fn test_wait_options_cancellation_requested() {
        let token = CancellationToken::new();
        let options = WaitOptions::new().cancellation(token.clone());
        assert!(!options.is_cancellation_requested());

        token.cancel();
        assert!(options.is_cancellation_requested());
        assert!(!WaitOptions::new().is_cancellation_requested());
    }
}
