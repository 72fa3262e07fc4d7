//! FIFO-fair async synchronization for tokio
//!
//! This crate provides a reusable engine for building wait primitives that
//! are strictly first-come first-served, cancellable, and timeout-aware,
//! plus a pipe that surfaces concurrently running operations in the order
//! they finish.
//!
//! # Building blocks
//!
//! - [`WaitNode`] / [`NodePool`] - pooled, single-resolution waiter records
//! - [`WaitQueue`] - index-linked FIFO of waiter nodes
//! - [`QueuedSynchronizer`] - the fairness and acquisition engine, driven by a
//!   [`LockManager`] policy
//! - [`TaskCompletionPipe`] - completion-order fan-in of operations
//!
//! # Primitives
//!
//! - [`AsyncExclusiveLock`] - mutual exclusion
//! - [`Semaphore`] - counting semaphore with multi-permit requests
//! - [`AsyncReaderWriterLock`] - shared/exclusive lock without writer starvation
//! - [`AsyncManualResetEvent`] - broadcast signal
//!
//! # Example
//!
//! ```rust,no_run
//! use fairsync::{Semaphore, WaitOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> fairsync::Result<()> {
//!     let sem = Semaphore::new(100);
//!
//!     // Spawn many tasks, but only 100 run concurrently
//!     for i in 0..1000 {
//!         let sem = sem.clone();
//!         tokio::spawn(async move {
//!             let options = WaitOptions::new().timeout(Duration::from_secs(1));
//!             if let Ok(Some(_permit)) = sem.acquire_many(1, options).await {
//!                 println!("Task {}", i);
//!             }
//!         });
//!     }
//!     Ok(())
//! }
//! ```

mod diagnostics;
mod error;
mod node;
mod options;
mod pipe;
mod pool;
mod queue;
mod synchronizer;
mod wait;

pub mod primitives;

pub use diagnostics::{CallerTag, CounterSnapshot, SyncCounters};
pub use error::{Result, WaitError};
pub use node::{NodeHandle, Resolution, WaitNode};
pub use options::{SyncOptions, Timeout, WaitOptions};
pub use pipe::TaskCompletionPipe;
pub use pool::NodePool;
pub use primitives::{
    AsyncExclusiveLock, AsyncManualResetEvent, AsyncReaderWriterLock, ExclusiveLockGuard,
    ReadLockGuard, Semaphore, SemaphorePermit, WriteLockGuard,
};
pub use queue::{Drain, WaitQueue};
pub use synchronizer::{LockManager, QueuedSynchronizer};

pub use tokio_util::sync::CancellationToken;
