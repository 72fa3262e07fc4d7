//! Async counting semaphore
//!
//! Provides a FIFO-fair semaphore on top of the queued synchronizer engine.
//! Callers may take several permits at once; a large request at the head of
//! the queue is never overtaken by smaller requests behind it.
//!
//! # Example
//!
//! ```rust,no_run
//! use fairsync::Semaphore;
//! use std::sync::Arc;
//!
//! # async fn example() -> fairsync::Result<()> {
//! // Create semaphore with 1024 permits
//! let semaphore = Arc::new(Semaphore::new(1024));
//!
//! // Acquire permit before starting work
//! let permit = semaphore.acquire().await?;
//!
//! // Do work while holding permit
//! // ...
//!
//! // Permit automatically released when dropped
//! drop(permit);
//! # Ok(())
//! # }
//! ```

use crate::diagnostics::{CallerTag, CounterSnapshot};
use crate::error::{Result, WaitError};
use crate::options::{SyncOptions, WaitOptions};
use crate::synchronizer::{LockManager, QueuedSynchronizer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Permit accounting shared by all clones
#[derive(Debug)]
struct SemaphoreState {
    /// Permits not currently held
    available: usize,
    /// Maximum permits (configured limit)
    max: usize,
}

/// Acquisition of `self.0` permits
#[derive(Debug, Clone, Copy)]
struct Permits(usize);

impl LockManager for Permits {
    type State = SemaphoreState;

    fn is_lock_allowed(&self, state: &SemaphoreState) -> bool {
        state.available >= self.0
    }

    fn acquire_lock(&self, state: &mut SemaphoreState) {
        state.available -= self.0;
    }

    fn release_lock(&self, state: &mut SemaphoreState) {
        state.available += self.0;
    }

    fn is_ready_to_dispose(state: &SemaphoreState) -> bool {
        state.available == state.max
    }
}

/// A FIFO-fair async semaphore for bounding concurrency
///
/// The semaphore maintains a fixed number of permits that must be acquired
/// before performing an operation. When not enough permits are available,
/// callers queue and are served strictly in arrival order.
///
/// # Design
///
/// - **FIFO waiters**: a request that cannot be satisfied blocks every later request
/// - **RAII permits**: `SemaphorePermit` automatically releases on drop
/// - **Cloneable**: all clones share one set of permits
#[derive(Clone)]
pub struct Semaphore {
    /// Shared engine for all clones of this semaphore
    inner: Arc<QueuedSynchronizer<Permits>>,
}

impl Semaphore {
    /// Create a new semaphore with the given number of permits
    ///
    /// # Panics
    ///
    /// Panics if `permits` is 0 (semaphore must have at least one permit)
    ///
    /// # Example
    ///
    /// ```rust
    /// use fairsync::Semaphore;
    ///
    /// let sem = Semaphore::new(1024);
    /// assert_eq!(sem.available_permits(), 1024);
    /// ```
    #[must_use]
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0, "Semaphore must have at least one permit");
        Self::build(permits, permits, SyncOptions::default())
    }

    /// Create a semaphore holding `initial` of `max` permits
    ///
    /// # Errors
    ///
    /// Invalid argument if `max` is 0 or `initial` exceeds `max`.
    pub fn with_options(initial: usize, max: usize, options: SyncOptions) -> Result<Self> {
        if max == 0 {
            return Err(WaitError::InvalidArgument("semaphore must have at least one permit"));
        }
        if initial > max {
            return Err(WaitError::InvalidArgument("initial permits exceed the maximum"));
        }
        Ok(Self::build(initial, max, options))
    }

    fn build(initial: usize, max: usize, options: SyncOptions) -> Self {
        let state = SemaphoreState {
            available: initial,
            max,
        };
        Self {
            inner: Arc::new(QueuedSynchronizer::new(state, options)),
        }
    }

    fn check_request(&self, permits: usize) -> Result<Permits> {
        if permits == 0 || permits > self.max_permits() {
            return Err(WaitError::InvalidArgument(
                "permit count must be between 1 and the maximum",
            ));
        }
        Ok(Permits(permits))
    }

    /// Acquire a permit, waiting asynchronously if none are available
    ///
    /// # Errors
    ///
    /// Disposed.
    pub async fn acquire(&self) -> Result<SemaphorePermit> {
        self.acquire_or_timeout(1, WaitOptions::new()).await
    }

    /// Acquire `permits` permits, returning `Ok(None)` on timeout
    ///
    /// # Errors
    ///
    /// Invalid argument for 0 or more than `max_permits()` permits; disposed;
    /// canceled.
    pub async fn acquire_many(
        &self,
        permits: usize,
        options: WaitOptions,
    ) -> Result<Option<SemaphorePermit>> {
        let request = self.check_request(permits)?;
        let acquired = self.inner.wait(request, options).await?;
        Ok(acquired.then(|| self.permit(permits)))
    }

    /// Acquire `permits` permits, failing with
    /// [`WaitError::TimedOut`] on timeout
    ///
    /// # Errors
    ///
    /// As [`acquire_many`](Self::acquire_many), plus timed out.
    pub async fn acquire_or_timeout(
        &self,
        permits: usize,
        options: WaitOptions,
    ) -> Result<SemaphorePermit> {
        let request = self.check_request(permits)?;
        self.inner.wait_or_timeout(request, options).await?;
        Ok(self.permit(permits))
    }

    /// Try to acquire a permit without waiting
    ///
    /// Returns `None` if no permit is available or other callers are queued.
    ///
    /// # Example
    ///
    /// ```rust
    /// use fairsync::Semaphore;
    ///
    /// let sem = Semaphore::new(1);
    ///
    /// let permit1 = sem.try_acquire();
    /// assert!(permit1.is_some());
    ///
    /// let permit2 = sem.try_acquire();
    /// assert!(permit2.is_none());  // No permits left
    /// ```
    #[must_use]
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        self.try_acquire_many(1)
    }

    /// Try to acquire `permits` permits without waiting
    #[must_use]
    pub fn try_acquire_many(&self, permits: usize) -> Option<SemaphorePermit> {
        let request = self.check_request(permits).ok()?;
        self.inner
            .try_acquire(&request)
            .then(|| self.permit(permits))
    }

    /// Return `permits` permits that were taken out of band
    ///
    /// Permits held by a [`SemaphorePermit`] are returned by dropping it.
    ///
    /// # Errors
    ///
    /// Invalid operation if the release would exceed `max_permits()`.
    pub fn release(&self, permits: usize) -> Result<()> {
        self.inner.release_with(|state| {
            let Some(available) = state
                .available
                .checked_add(permits)
                .filter(|available| *available <= state.max)
            else {
                return Err(WaitError::InvalidOperation("semaphore is already full"));
            };
            state.available = available;
            Ok(())
        })
    }

    /// Get the number of available permits
    ///
    /// This is useful for monitoring and debugging but should not be used
    /// for making decisions (value may change immediately after reading).
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.read_state(|state| state.available)
    }

    /// Get the maximum number of permits (configured limit)
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.inner.read_state(|state| state.max)
    }

    /// Get the number of permits currently in use (max - available)
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.read_state(|state| state.max - state.available)
    }

    /// Number of queued callers
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    /// Tags of queued callers in queue order (requires caller tracking)
    #[must_use]
    pub fn suspended_callers(&self) -> Vec<CallerTag> {
        self.inner.suspended_callers()
    }

    /// Counter values, if counters were configured
    #[must_use]
    pub fn counters(&self) -> Option<CounterSnapshot> {
        self.inner.counters()
    }

    /// Cancel every queued caller
    ///
    /// # Errors
    ///
    /// Invalid argument if `reason` is not canceled.
    pub fn cancel_suspended_callers(&self, reason: &CancellationToken) -> Result<usize> {
        self.inner.cancel_suspended_callers(reason)
    }

    /// Dispose, failing every queued and future caller
    ///
    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub fn dispose(&self) -> Result<()> {
        self.inner.dispose()
    }

    /// Dispose, completing once every permit has been returned
    ///
    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub async fn dispose_async(&self) -> Result<()> {
        self.inner.dispose_async().await
    }

    fn permit(&self, permits: usize) -> SemaphorePermit {
        SemaphorePermit {
            semaphore: self.clone(),
            permits,
        }
    }
}

/// RAII guard that releases semaphore permits on drop
///
/// When dropped, it returns its permits and grants them to queued callers
/// in FIFO order.
#[must_use = "permits are released as soon as the guard is dropped"]
pub struct SemaphorePermit {
    /// Reference to the semaphore that issued this permit
    semaphore: Semaphore,
    /// Number of permits held
    permits: usize,
}

impl SemaphorePermit {
    /// Number of permits held by this guard
    #[must_use]
    pub const fn permits(&self) -> usize {
        self.permits
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        let permits = self.permits;
        self.semaphore
            .inner
            .release_with(|state| state.available += permits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_semaphore_new() {
        let sem = Semaphore::new(100);
        assert_eq!(sem.available_permits(), 100);
        assert_eq!(sem.max_permits(), 100);
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn test_semaphore_try_acquire() {
        let sem = Semaphore::new(2);

        // Acquire first permit
        let permit1 = sem.try_acquire();
        assert!(permit1.is_some());
        assert_eq!(sem.available_permits(), 1);
        assert_eq!(sem.in_use(), 1);

        // Acquire second permit
        let permit2 = sem.try_acquire();
        assert!(permit2.is_some());
        assert_eq!(sem.available_permits(), 0);

        // Try to acquire third (should fail)
        assert!(sem.try_acquire().is_none());

        // Release first permit
        drop(permit1);
        assert_eq!(sem.available_permits(), 1);

        // Can acquire again
        assert!(sem.try_acquire().is_some());
    }

    #[test]
    fn test_semaphore_rejects_bad_requests() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire_many(0).is_none());
        assert!(sem.try_acquire_many(3).is_none());
        assert!(matches!(
            Semaphore::with_options(3, 2, SyncOptions::new()),
            Err(WaitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_semaphore_release_bounded_by_max() {
        let sem = Semaphore::with_options(0, 2, SyncOptions::new()).unwrap();
        assert_eq!(sem.release(2), Ok(()));
        assert_eq!(sem.available_permits(), 2);
        assert!(matches!(sem.release(1), Err(WaitError::InvalidOperation(_))));
        assert!(matches!(sem.release(usize::MAX), Err(WaitError::InvalidOperation(_))));
        assert_eq!(sem.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_semaphore_acquire_basic() {
        let sem = Semaphore::new(2);

        let permit1 = sem.acquire().await.unwrap();
        assert_eq!(sem.available_permits(), 1);

        let permit2 = sem.acquire().await.unwrap();
        assert_eq!(sem.available_permits(), 0);

        drop(permit1);
        assert_eq!(sem.available_permits(), 1);

        drop(permit2);
        assert_eq!(sem.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_semaphore_blocking_and_wakeup() {
        let sem = Semaphore::new(1);

        // Acquire the only permit
        let permit1 = sem.acquire().await.unwrap();

        // Spawn a task that will block waiting for permit
        let sem2 = sem.clone();
        let handle = tokio::spawn(async move {
            let _permit = sem2.acquire().await.unwrap();
            42
        });
        while sem.queue_len() == 0 {
            tokio::task::yield_now().await;
        }

        // Release permit - should wake the blocked task
        drop(permit1);

        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_large_request_is_not_overtaken() {
        let sem = Semaphore::new(3);
        let held = sem.try_acquire_many(2).unwrap();

        let big = tokio::spawn({
            let sem = sem.clone();
            async move { sem.acquire_or_timeout(3, WaitOptions::new()).await.map(|p| p.permits()) }
        });
        while sem.queue_len() == 0 {
            tokio::task::yield_now().await;
        }

        // One permit is free, but the queued request for three comes first
        assert!(sem.try_acquire().is_none());
        let small = sem
            .acquire_many(1, WaitOptions::new().timeout(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(small.is_none());

        drop(held);
        assert_eq!(big.await.unwrap(), Ok(3));
        assert_eq!(sem.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_semaphore_high_concurrency() {
        let sem = Semaphore::new(100);
        let mut handles = Vec::new();

        // Spawn 1000 tasks, but only 100 should run concurrently
        for i in 0..1000 {
            let sem = sem.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.unwrap();
                tokio::task::yield_now().await;
                i
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.len(), 1000);
        assert_eq!(sem.available_permits(), 100);
    }

    #[tokio::test]
    async fn test_semaphore_clone() {
        let sem = Semaphore::new(10);
        let sem2 = sem.clone();

        let permit1 = sem.acquire().await.unwrap();
        assert_eq!(sem2.available_permits(), 9);

        let permit2 = sem2.acquire().await.unwrap();
        assert_eq!(sem.available_permits(), 8);

        drop(permit1);
        drop(permit2);
        assert_eq!(sem.available_permits(), 10);
    }

    #[tokio::test]
    async fn test_dispose_async_waits_for_all_permits() {
        let sem = Semaphore::new(2);
        let permit = sem.acquire().await.unwrap();

        let disposing = tokio::spawn({
            let sem = sem.clone();
            async move { sem.dispose_async().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!disposing.is_finished());

        drop(permit);
        assert!(disposing.await.unwrap().is_ok());
    }

    #[test]
    #[should_panic(expected = "Semaphore must have at least one permit")]
    fn test_semaphore_zero_permits_panics() {
        let _sem = Semaphore::new(0);
    }
}
