//! Concrete primitives built on [`QueuedSynchronizer`](crate::QueuedSynchronizer)

pub mod event;
pub mod exclusive;
pub mod rwlock;
pub mod semaphore;

pub use event::AsyncManualResetEvent;
pub use exclusive::{AsyncExclusiveLock, ExclusiveLockGuard};
pub use rwlock::{AsyncReaderWriterLock, ReadLockGuard, WriteLockGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
