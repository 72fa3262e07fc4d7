//! Async exclusive lock
//!
//! A FIFO-fair mutual exclusion lock without protected data: holding the
//! [`ExclusiveLockGuard`] is the critical section.
//!
//! # Example
//!
//! ```rust,no_run
//! use fairsync::{AsyncExclusiveLock, WaitOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> fairsync::Result<()> {
//! let lock = AsyncExclusiveLock::new();
//!
//! let guard = lock.lock().await?;
//! // ... critical section ...
//! drop(guard);
//!
//! let options = WaitOptions::new().timeout(Duration::from_millis(100));
//! if let Some(_guard) = lock.acquire(options).await? {
//!     // acquired within 100ms
//! }
//! # Ok(())
//! # }
//! ```

use crate::diagnostics::{CallerTag, CounterSnapshot};
use crate::error::Result;
use crate::options::{SyncOptions, WaitOptions};
use crate::synchronizer::{LockManager, QueuedSynchronizer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Exclusive acquisition; the state is "held"
#[derive(Debug, Clone, Copy)]
struct Exclusive;

impl LockManager for Exclusive {
    type State = bool;

    fn is_lock_allowed(&self, held: &bool) -> bool {
        !*held
    }

    fn acquire_lock(&self, held: &mut bool) {
        *held = true;
    }

    fn release_lock(&self, held: &mut bool) {
        *held = false;
    }

    fn is_ready_to_dispose(held: &bool) -> bool {
        !*held
    }
}

/// FIFO-fair async mutual exclusion lock
///
/// Cloning is cheap and every clone refers to the same lock.
#[derive(Clone)]
pub struct AsyncExclusiveLock {
    sync: Arc<QueuedSynchronizer<Exclusive>>,
}

impl Default for AsyncExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncExclusiveLock {
    /// Create an unlocked lock
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SyncOptions::default())
    }

    /// Create an unlocked lock with counters and caller tracking
    #[must_use]
    pub fn with_options(options: SyncOptions) -> Self {
        Self {
            sync: Arc::new(QueuedSynchronizer::new(false, options)),
        }
    }

    /// Acquire without waiting
    ///
    /// Fails if the lock is held or any caller is queued for it.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ExclusiveLockGuard> {
        self.sync
            .try_acquire(&Exclusive)
            .then(|| ExclusiveLockGuard { lock: self.clone() })
    }

    /// Acquire, returning `Ok(None)` if the timeout expires first
    ///
    /// # Errors
    ///
    /// [`WaitError::Disposed`](crate::WaitError::Disposed) or
    /// [`WaitError::Canceled`](crate::WaitError::Canceled).
    pub async fn acquire(&self, options: WaitOptions) -> Result<Option<ExclusiveLockGuard>> {
        let acquired = self.sync.wait(Exclusive, options).await?;
        Ok(acquired.then(|| ExclusiveLockGuard { lock: self.clone() }))
    }

    /// Acquire, failing with [`WaitError::TimedOut`](crate::WaitError::TimedOut)
    /// if the timeout expires first
    ///
    /// # Errors
    ///
    /// Timed out, disposed or canceled.
    pub async fn acquire_or_timeout(&self, options: WaitOptions) -> Result<ExclusiveLockGuard> {
        self.sync.wait_or_timeout(Exclusive, options).await?;
        Ok(ExclusiveLockGuard { lock: self.clone() })
    }

    /// Acquire with an infinite timeout
    ///
    /// # Errors
    ///
    /// Disposed.
    pub async fn lock(&self) -> Result<ExclusiveLockGuard> {
        self.acquire_or_timeout(WaitOptions::new()).await
    }

    /// Check if the lock is held
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.sync.read_state(|held| *held)
    }

    /// Number of queued callers
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.sync.queue_len()
    }

    /// Tags of queued callers in queue order (requires caller tracking)
    #[must_use]
    pub fn suspended_callers(&self) -> Vec<CallerTag> {
        self.sync.suspended_callers()
    }

    /// Counter values, if counters were configured
    #[must_use]
    pub fn counters(&self) -> Option<CounterSnapshot> {
        self.sync.counters()
    }

    /// Cancel every queued caller
    ///
    /// # Errors
    ///
    /// Invalid argument if `reason` is not canceled.
    pub fn cancel_suspended_callers(&self, reason: &CancellationToken) -> Result<usize> {
        self.sync.cancel_suspended_callers(reason)
    }

    /// Dispose, failing every queued and future caller
    ///
    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub fn dispose(&self) -> Result<()> {
        self.sync.dispose()
    }

    /// Dispose, completing once the current holder (if any) releases
    ///
    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub async fn dispose_async(&self) -> Result<()> {
        self.sync.dispose_async().await
    }

    fn release(&self) {
        self.sync.release_with(|held| *held = false);
    }
}

/// Holds the lock; releases on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ExclusiveLockGuard {
    lock: AsyncExclusiveLock,
}

impl Drop for ExclusiveLockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
