//! Async reader/writer lock
//!
//! Any number of readers or a single writer may hold the lock. Queueing is
//! strictly FIFO: a reader arriving behind a queued writer waits for that
//! writer even while other readers hold the lock, so writers cannot starve.

use crate::diagnostics::{CallerTag, CounterSnapshot};
use crate::error::Result;
use crate::options::{SyncOptions, WaitOptions};
use crate::synchronizer::{LockManager, QueuedSynchronizer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl LockManager for Access {
    type State = Holders;

    fn is_lock_allowed(&self, holders: &Holders) -> bool {
        match self {
            Self::Read => !holders.writer,
            Self::Write => !holders.writer && holders.readers == 0,
        }
    }

    fn acquire_lock(&self, holders: &mut Holders) {
        match self {
            Self::Read => holders.readers += 1,
            Self::Write => holders.writer = true,
        }
    }

    fn release_lock(&self, holders: &mut Holders) {
        match self {
            Self::Read => holders.readers = holders.readers.saturating_sub(1),
            Self::Write => holders.writer = false,
        }
    }

    fn is_ready_to_dispose(holders: &Holders) -> bool {
        holders.readers == 0 && !holders.writer
    }
}

/// FIFO-fair async reader/writer lock
#[derive(Clone)]
pub struct AsyncReaderWriterLock {
    sync: Arc<QueuedSynchronizer<Access>>,
}

impl Default for AsyncReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncReaderWriterLock {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SyncOptions::default())
    }

    #[must_use]
    pub fn with_options(options: SyncOptions) -> Self {
        Self {
            sync: Arc::new(QueuedSynchronizer::new(Holders::default(), options)),
        }
    }

    /// Take a read lock without waiting
    #[must_use]
    pub fn try_read(&self) -> Option<ReadLockGuard> {
        self.sync
            .try_acquire(&Access::Read)
            .then(|| ReadLockGuard { lock: self.clone() })
    }

    /// Take the write lock without waiting
    #[must_use]
    pub fn try_write(&self) -> Option<WriteLockGuard> {
        self.sync
            .try_acquire(&Access::Write)
            .then(|| WriteLockGuard { lock: self.clone() })
    }

    /// Take a read lock, returning `Ok(None)` on timeout
    ///
    /// # Errors
    ///
    /// Disposed or canceled.
    pub async fn read(&self, options: WaitOptions) -> Result<Option<ReadLockGuard>> {
        let acquired = self.sync.wait(Access::Read, options).await?;
        Ok(acquired.then(|| ReadLockGuard { lock: self.clone() }))
    }

    /// Take the write lock, returning `Ok(None)` on timeout
    ///
    /// # Errors
    ///
    /// Disposed or canceled.
    pub async fn write(&self, options: WaitOptions) -> Result<Option<WriteLockGuard>> {
        let acquired = self.sync.wait(Access::Write, options).await?;
        Ok(acquired.then(|| WriteLockGuard { lock: self.clone() }))
    }

    /// Take a read lock, failing with
    /// [`WaitError::TimedOut`](crate::WaitError::TimedOut) on timeout
    ///
    /// # Errors
    ///
    /// Timed out, disposed or canceled.
    pub async fn read_or_timeout(&self, options: WaitOptions) -> Result<ReadLockGuard> {
        self.sync.wait_or_timeout(Access::Read, options).await?;
        Ok(ReadLockGuard { lock: self.clone() })
    }

    /// Take the write lock, failing with
    /// [`WaitError::TimedOut`](crate::WaitError::TimedOut) on timeout
    ///
    /// # Errors
    ///
    /// Timed out, disposed or canceled.
    pub async fn write_or_timeout(&self, options: WaitOptions) -> Result<WriteLockGuard> {
        self.sync.wait_or_timeout(Access::Write, options).await?;
        Ok(WriteLockGuard { lock: self.clone() })
    }

    /// Number of readers currently holding the lock
    #[must_use]
    pub fn readers(&self) -> usize {
        self.sync.read_state(|holders| holders.readers)
    }

    /// Check if a writer holds the lock
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.sync.read_state(|holders| holders.writer)
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

    /// Cancel every queued reader and writer
    ///
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

    /// Dispose, completing once every reader and the writer have released
    ///
    /// # Errors
    ///
    /// Invalid argument if already disposed.
    pub async fn dispose_async(&self) -> Result<()> {
        self.sync.dispose_async().await
    }
}

/// Shared access; released on drop
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadLockGuard {
    lock: AsyncReaderWriterLock,
}

impl Drop for ReadLockGuard {
    fn drop(&mut self) {
        self.lock
            .sync
            .release_with(|holders| Access::Read.release_lock(holders));
    }
}

/// Exclusive access; released on drop
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteLockGuard {
    lock: AsyncReaderWriterLock,
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        self.lock
            .sync
            .release_with(|holders| Access::Write.release_lock(holders));
    }
}
