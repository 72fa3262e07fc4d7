//! Optional instrumentation: contention counters and caller tags

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Caller-identifying information attached to a wait
///
/// Recorded only when the synchronizer was built with caller tracking; it
/// lets a postmortem see who is queued right now via `suspended_callers()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerTag(Arc<str>);

impl CallerTag {
    /// The tag text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallerTag {
    fn from(tag: &str) -> Self {
        Self(Arc::from(tag))
    }
}

impl From<String> for CallerTag {
    fn from(tag: String) -> Self {
        Self(Arc::from(tag))
    }
}

impl fmt::Display for CallerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contention and wait-duration counters
///
/// A single instance may be shared by several synchronizers to aggregate
/// their statistics.
#[derive(Debug, Default)]
pub struct SyncCounters {
    /// Number of waits that had to be queued
    contention: AtomicU64,
    /// Number of queued waits that were granted
    resolved: AtomicU64,
    /// Sum of wait durations of granted waits, in nanoseconds
    total_wait_nanos: AtomicU64,
    /// Longest single wait, in nanoseconds
    max_wait_nanos: AtomicU64,
}

impl SyncCounters {
    /// Create a shareable set of zeroed counters
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_contention(&self) {
        self.contention.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.resolved.fetch_add(1, Ordering::Relaxed);
        self.total_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_wait_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Current values
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            contention: self.contention.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            total_wait: Duration::from_nanos(self.total_wait_nanos.load(Ordering::Relaxed)),
            max_wait: Duration::from_nanos(self.max_wait_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`SyncCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Waits that had to be queued
    pub contention: u64,
    /// Queued waits that were granted
    pub resolved: u64,
    /// Total time granted waiters spent queued
    pub total_wait: Duration,
    /// Longest time a granted waiter spent queued
    pub max_wait: Duration,
}

impl CounterSnapshot {
    /// Mean queueing time of granted waits
    #[must_use]
    pub fn mean_wait(&self) -> Duration {
        if self.resolved == 0 {
            return Duration::ZERO;
        }
        let mean = self.total_wait.as_nanos() / u128::from(self.resolved);
        Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX))
    }
}
