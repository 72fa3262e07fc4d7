//! Async manual-reset event
//!
//! Waiters suspend until the event is set; setting it releases every queued
//! waiter at once and lets later waiters through until it is reset.

use crate::diagnostics::{CallerTag, CounterSnapshot};
use crate::error::Result;
use crate::options::{SyncOptions, WaitOptions};
use crate::synchronizer::{LockManager, QueuedSynchronizer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Passes while the event is signaled; acquisition leaves no trace
#[derive(Debug, Clone, Copy)]
struct Signaled;

impl LockManager for Signaled {
    type State = bool;

    fn is_lock_allowed(&self, signaled: &bool) -> bool {
        *signaled
    }

    fn acquire_lock(&self, _signaled: &mut bool) {}

    fn release_lock(&self, _signaled: &mut bool) {}
}

/// Broadcast event that stays set until [`reset`](Self::reset)
#[derive(Clone)]
pub struct AsyncManualResetEvent {
    sync: Arc<QueuedSynchronizer<Signaled>>,
}

impl AsyncManualResetEvent {
    /// Create an event in the given state
    #[must_use]
    pub fn new(initially_set: bool) -> Self {
        Self::with_options(initially_set, SyncOptions::default())
    }

    #[must_use]
    pub fn with_options(initially_set: bool, options: SyncOptions) -> Self {
        Self {
            sync: Arc::new(QueuedSynchronizer::new(initially_set, options)),
        }
    }

    /// Signal the event, releasing every queued waiter
    ///
    /// Returns how many waiters were released.
    pub fn set(&self) -> usize {
        self.sync.resume_all_with(|signaled| *signaled = true)
    }

    /// Return the event to the non-signaled state
    pub fn reset(&self) {
        self.sync.release_with(|signaled| *signaled = false);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.sync.read_state(|signaled| *signaled)
    }

    /// Pass if the event is set, without waiting
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.sync.try_acquire(&Signaled)
    }

    /// Wait for the event; `Ok(false)` if the timeout expires first
    ///
    /// # Errors
    ///
    /// Disposed or canceled.
    pub async fn wait(&self, options: WaitOptions) -> Result<bool> {
        self.sync.wait(Signaled, options).await
    }

    /// Wait for the event, failing with
    /// [`WaitError::TimedOut`](crate::WaitError::TimedOut) on timeout
    ///
    /// # Errors
    ///
    /// Timed out, disposed or canceled.
    pub async fn wait_or_timeout(&self, options: WaitOptions) -> Result<()> {
        self.sync.wait_or_timeout(Signaled, options).await
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.sync.queue_len()
    }

    #[must_use]
    pub fn suspended_callers(&self) -> Vec<CallerTag> {
        self.sync.suspended_callers()
    }

    #[must_use]
    pub fn counters(&self) -> Option<CounterSnapshot> {
        self.sync.counters()
    }

    /// # Errors
    ///
    /// Invalid argument if `reason` is not canceled.
    pub fn cancel_suspended_callers(&self, reason: &CancellationToken) -> Result<usize> {
        self.sync.cancel_suspended_callers(reason)
    }

    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub fn dispose(&self) -> Result<()> {
        self.sync.dispose()
    }

    /// An event has no holders, so this completes right away
    ///
    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub async fn dispose_async(&self) -> Result<()> {
        self.sync.dispose_async().await
    }
}
