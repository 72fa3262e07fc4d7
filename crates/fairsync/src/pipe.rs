//! Task completion pipe
//!
//! [`TaskCompletionPipe`] accepts any number of concurrently running
//! operations and hands their outputs to consumers in the order the
//! operations *finish*, not the order they were added.
//!
//! # States
//!
//! ```text
//! open --complete()--> completion requested --last item read--> terminal
//! ```
//!
//! The scheduled count, not the number of finished items, decides whether
//! more output can arrive: an added operation that has not finished yet keeps
//! the pipe from terminating.
//!
//! # Example
//!
//! ```rust,no_run
//! use fairsync::TaskCompletionPipe;
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! # async fn example() -> fairsync::Result<()> {
//! let pipe = TaskCompletionPipe::new();
//! pipe.add(async {
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     "slow"
//! })?;
//! pipe.add(async { "fast" })?;
//! pipe.complete()?;
//!
//! let order: Vec<_> = pipe.into_stream().collect().await;
//! assert_eq!(order, vec!["fast", "slow"]);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, WaitError};
use crate::node::{NodeHandle, Resolution};
use crate::options::WaitOptions;
use crate::queue::{Drain, WakeList};
use crate::wait::{TimeoutMode, Wait, WaitHost, Waiters};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

struct PipeState<T> {
    /// Added and not yet read (finished or still running)
    scheduled: usize,
    completion_requested: bool,
    completed: VecDeque<T>,
    /// Consumers blocked in `wait_to_read`
    waiters: Waiters<()>,
}

impl<T> PipeState<T> {
    const fn is_terminal(&self) -> bool {
        self.completion_requested && self.scheduled == 0
    }

    /// Release every blocked consumer with end-of-stream once terminal
    fn drain_if_terminal(&mut self, wakers: &mut WakeList) {
        if self.is_terminal() {
            let released = self.waiters.drain(&Drain::Succeed(false), wakers);
            debug!(released, "pipe reached end of stream");
        }
    }
}

struct PipeShared<T> {
    state: Mutex<PipeState<T>>,
}

impl<T: Send + 'static> PipeShared<T> {
    fn lock(&self) -> MutexGuard<'_, PipeState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a finished output and signal the earliest blocked consumer
    fn push_completed(&self, output: T) {
        let mut wakers = WakeList::new();
        {
            let mut state = self.lock();
            state.completed.push_back(output);
            state.waiters.resume_first(true, &mut wakers);
        }
        wakers.wake_all();
    }

    /// Forget an operation that panicked instead of producing output
    fn discard_failed(&self) {
        let mut wakers = WakeList::new();
        {
            let mut state = self.lock();
            state.scheduled = state.scheduled.saturating_sub(1);
            warn!(scheduled = state.scheduled, "pipe operation panicked; dropping it");
            state.drain_if_terminal(&mut wakers);
        }
        wakers.wake_all();
    }
}

impl<T: Send + 'static> WaitHost for PipeShared<T> {
    fn poll_node(&self, node: NodeHandle, waker: &Waker) -> Option<Resolution> {
        self.lock()
            .waiters
            .observe(node, waker)
            .map(|detached| detached.resolution)
    }

    fn expire(&self, node: NodeHandle, resolution: Resolution) -> Resolution {
        let mut state = self.lock();
        state.waiters.resolve(node, resolution);
        state.waiters.recycle(node).resolution
    }

    fn abandon(&self, node: NodeHandle) {
        let mut wakers = WakeList::new();
        {
            let mut state = self.lock();
            let canceled = state.waiters.resolve(node, Resolution::Canceled);
            let detached = state.waiters.recycle(node);
            // A dropped consumer must not swallow an item notification
            if !canceled && detached.resolution == Resolution::Succeeded(true) {
                state.waiters.resume_first(true, &mut wakers);
            }
        }
        wakers.wake_all();
    }
}

/// Completion-order multiplexer over concurrently running operations
///
/// Cloning is cheap; clones share the same pipe, so producers and consumers
/// may live on different tasks.
pub struct TaskCompletionPipe<T> {
    shared: Arc<PipeShared<T>>,
}

impl<T> Clone for TaskCompletionPipe<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Default for TaskCompletionPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskCompletionPipe<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a pipe sized for about `capacity` outstanding operations
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PipeShared {
                state: Mutex::new(PipeState {
                    scheduled: 0,
                    completion_requested: false,
                    completed: VecDeque::with_capacity(capacity),
                    waiters: Waiters::with_capacity(0),
                }),
            }),
        }
    }

    /// Register an operation
    ///
    /// The operation is polled once right away; if it is already finished
    /// its output is queued immediately. Otherwise it is spawned on the
    /// current tokio runtime and queued when it finishes. A panicking
    /// operation is dropped from the pipe.
    ///
    /// # Errors
    ///
    /// - [`WaitError::InvalidOperation`] if [`complete`](Self::complete) was
    ///   already called, or if the operation is unfinished and there is no
    ///   tokio runtime to drive it
    pub fn add<F>(&self, operation: F) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        if self.shared.lock().completion_requested {
            return Err(WaitError::InvalidOperation("pipe completion already requested"));
        }

        let mut operation = Box::pin(operation);
        match AssertUnwindSafe(operation.as_mut()).catch_unwind().now_or_never() {
            Some(Ok(output)) => return self.add_finished(output),
            Some(Err(_)) => {
                warn!("pipe operation panicked on its first poll; dropping it");
                return Ok(());
            }
            None => {}
        }

        let runtime = Handle::try_current().map_err(|_| {
            WaitError::InvalidOperation("adding an unfinished operation requires a tokio runtime")
        })?;
        let scheduled = {
            let mut state = self.shared.lock();
            if state.completion_requested {
                return Err(WaitError::InvalidOperation("pipe completion already requested"));
            }
            state.scheduled += 1;
            state.scheduled
        };
        trace!(scheduled, "pipe operation spawned");

        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(output) => shared.push_completed(output),
                Err(_) => shared.discard_failed(),
            }
        });
        Ok(())
    }

    fn add_finished(&self, output: T) -> Result<()> {
        let mut wakers = WakeList::new();
        {
            let mut state = self.shared.lock();
            if state.completion_requested {
                return Err(WaitError::InvalidOperation("pipe completion already requested"));
            }
            state.scheduled += 1;
            state.completed.push_back(output);
            state.waiters.resume_first(true, &mut wakers);
        }
        wakers.wake_all();
        Ok(())
    }

    /// Forbid further registrations
    ///
    /// Blocked consumers are released with end-of-stream right away when
    /// nothing is scheduled.
    ///
    /// # Errors
    ///
    /// [`WaitError::InvalidArgument`] if called twice.
    pub fn complete(&self) -> Result<()> {
        let mut wakers = WakeList::new();
        {
            let mut state = self.shared.lock();
            if state.completion_requested {
                return Err(WaitError::InvalidArgument("pipe completion already requested"));
            }
            state.completion_requested = true;
            debug!(scheduled = state.scheduled, "pipe completion requested");
            state.drain_if_terminal(&mut wakers);
        }
        wakers.wake_all();
        Ok(())
    }

    /// Take the earliest finished output without waiting
    pub fn try_read(&self) -> Option<T> {
        let mut wakers = WakeList::new();
        let output = {
            let mut state = self.shared.lock();
            let output = state.completed.pop_front()?;
            state.scheduled = state.scheduled.saturating_sub(1);
            state.drain_if_terminal(&mut wakers);
            output
        };
        wakers.wake_all();
        Some(output)
    }

    /// Wait until an output can be read
    ///
    /// Returns `Ok(true)` when [`try_read`](Self::try_read) has something to
    /// take and `Ok(false)` at end of stream. Another consumer may take the
    /// item first, so `Ok(true)` is a hint to try again, not a reservation.
    ///
    /// A timeout is always reported as an error so that `Ok(false)` means
    /// end of stream and nothing else.
    ///
    /// # Errors
    ///
    /// [`WaitError::TimedOut`] or [`WaitError::Canceled`].
    pub async fn wait_to_read(&self, options: WaitOptions) -> Result<bool> {
        self.enqueue(&options).await
    }

    fn enqueue(&self, options: &WaitOptions) -> Wait<PipeShared<T>> {
        let mode = TimeoutMode::Fail;
        let mut state = self.shared.lock();
        if options.is_cancellation_requested() {
            return Wait::ready(Err(WaitError::Canceled), mode);
        }
        if !state.completed.is_empty() {
            return Wait::ready(Ok(true), mode);
        }
        if state.is_terminal() {
            return Wait::ready(Ok(false), mode);
        }
        if options.timeout.is_zero() {
            return Wait::ready(mode.outcome(Resolution::TimedOut), mode);
        }
        let Some(node) = state.waiters.enqueue(None, |_| {}) else {
            return Wait::ready(
                Err(WaitError::InvalidOperation("waiter node could not be linked")),
                mode,
            );
        };
        drop(state);
        Wait::queued(Arc::clone(&self.shared), node, options, mode)
    }

    /// Operations added and not yet read
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.shared.lock().scheduled
    }

    #[must_use]
    pub fn is_completion_requested(&self) -> bool {
        self.shared.lock().completion_requested
    }

    /// Number of consumers blocked in `wait_to_read`
    #[must_use]
    pub fn waiting_consumers(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Drain outputs in completion order until end of stream
    ///
    /// The stream is not restartable; it ends once completion was requested
    /// and every added operation has been read.
    pub fn into_stream(self) -> BoxStream<'static, T> {
        stream::unfold(self, |pipe| async move {
            loop {
                if let Some(output) = pipe.try_read() {
                    return Some((output, pipe));
                }
                match pipe.wait_to_read(WaitOptions::new()).await {
                    Ok(true) => continue,
                    Ok(false) | Err(_) => return None,
                }
            }
        })
        .boxed()
    }
}
