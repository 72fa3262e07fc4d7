//! Queued synchronizer engine
//!
//! [`QueuedSynchronizer`] is the FIFO fairness and acquisition core shared by
//! every primitive in this crate. A primitive supplies a [`LockManager`]
//! describing its shared state and how an acquisition is granted; the engine
//! owns the wait queue, timeouts, cancellation, disposal and diagnostics.
//!
//! # Fairness
//!
//! An acquisition succeeds immediately only when the manager allows it *and*
//! no pending waiter is queued ahead of it. Releases walk the queue
//! head-to-tail granting waiters until the first one the manager refuses, so
//! a later waiter can never pass an earlier pending one.
//!
//! # Exclusive section
//!
//! All state lives behind one `std::sync::Mutex`. It is never held across an
//! `.await`, never re-entered, and wakers are woken only after it is left.

use crate::diagnostics::{CallerTag, CounterSnapshot, SyncCounters};
use crate::error::{Result, WaitError};
use crate::node::{NodeHandle, Resolution, WaitNode};
use crate::options::{SyncOptions, WaitOptions};
use crate::queue::{Drain, WakeList};
use crate::wait::{Detached, TimeoutMode, Wait, WaitHost, Waiters};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Per-primitive acquisition policy
///
/// A manager value describes one kind of acquisition (exclusive, `n`
/// permits, shared read, ...). It is stamped into the waiter node when the
/// caller has to queue, and re-evaluated from there when releases walk the
/// queue.
pub trait LockManager: Sized + Send + 'static {
    /// Shared state guarded by the synchronizer's exclusive section
    type State: Send + 'static;

    /// Whether this acquisition may be granted given `state`
    fn is_lock_allowed(&self, state: &Self::State) -> bool;

    /// Record the acquisition; only called right after `is_lock_allowed`
    /// returned `true`
    fn acquire_lock(&self, state: &mut Self::State);

    /// Undo `acquire_lock` for a waiter that was granted but dropped before
    /// it observed the grant
    fn release_lock(&self, state: &mut Self::State);

    /// Stamp this acquisition into a freshly pulled node
    fn initialize_node(self, node: &mut WaitNode<Self>) {
        node.set_request(self);
    }

    /// Whether an asynchronous disposal may finalize
    fn is_ready_to_dispose(_state: &Self::State) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposal {
    Active,
    /// Disposal requested, waiting for the state to report ready
    Requested,
    Finalized,
}

struct EngineState<M: LockManager> {
    lock: M::State,
    waiters: Waiters<M>,
    disposal: Disposal,
    dispose_wakers: Vec<Waker>,
}

impl<M: LockManager> EngineState<M> {
    /// Opportunistic cleanup, then the single fairness checkpoint
    fn try_acquire(&mut self, manager: &M) -> bool {
        self.waiters.remove_resolved_head();
        if manager.is_lock_allowed(&self.lock) && self.waiters.queue.is_empty() {
            manager.acquire_lock(&mut self.lock);
            return true;
        }
        false
    }

    /// Grant queued waiters head-to-tail until the manager refuses one
    fn resume_pending(&mut self, wakers: &mut WakeList) {
        let Self { lock, waiters, .. } = self;
        waiters.remove_resolved_head();
        while let Some(head) = waiters.queue.first(&waiters.pool) {
            let Some(node) = waiters.pool.get_mut(head) else {
                break;
            };
            if !node.is_pending() {
                waiters.queue.remove(&mut waiters.pool, head);
                continue;
            }
            let allowed = node
                .request()
                .is_some_and(|manager| manager.is_lock_allowed(lock));
            if !allowed {
                break;
            }
            if let Some(manager) = node.request() {
                manager.acquire_lock(lock);
            }
            node.mark_granted();
            node.try_resolve(Resolution::Succeeded(true));
            wakers.push(node.take_waker());
            waiters.queue.remove(&mut waiters.pool, head);
            trace!(index = head.index, "granted queued waiter");
        }
    }

    /// Finalize a requested disposal once the state allows it
    fn try_finalize(&mut self, wakers: &mut WakeList) {
        if self.disposal == Disposal::Requested && M::is_ready_to_dispose(&self.lock) {
            self.disposal = Disposal::Finalized;
            for waker in self.dispose_wakers.drain(..) {
                wakers.push(Some(waker));
            }
            debug!("deferred disposal finalized");
        }
    }
}

/// FIFO wait-queue synchronizer parameterized by a [`LockManager`]
///
/// Primitives hold it in an `Arc` so queued waits can outlive the borrow
/// that started them.
pub struct QueuedSynchronizer<M: LockManager> {
    state: Mutex<EngineState<M>>,
    counters: Option<Arc<SyncCounters>>,
    track_callers: bool,
}

impl<M: LockManager> QueuedSynchronizer<M> {
    /// Create an engine around the primitive's initial state
    #[must_use]
    pub fn new(state: M::State, options: SyncOptions) -> Self {
        Self {
            state: Mutex::new(EngineState {
                lock: state,
                waiters: Waiters::with_capacity(options.initial_capacity),
                disposal: Disposal::Active,
                dispose_wakers: Vec::new(),
            }),
            counters: options.counters,
            track_callers: options.track_callers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState<M>> {
        // The exclusive section never runs caller code, so a poisoned guard
        // still protects consistent state
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire without queueing
    ///
    /// Returns `false` if the manager refuses, if any pending waiter is
    /// queued ahead, or if the engine is disposed.
    pub fn try_acquire(&self, manager: &M) -> bool {
        let mut state = self.lock();
        state.disposal == Disposal::Active && state.try_acquire(manager)
    }

    /// Wait for an acquisition; an expired timeout yields `Ok(false)`
    ///
    /// # Errors
    ///
    /// - [`WaitError::Disposed`] if the engine is or becomes disposed
    /// - [`WaitError::Canceled`] if the token is or becomes canceled, or the
    ///   waiter is removed by [`cancel_suspended_callers`](Self::cancel_suspended_callers)
    pub async fn wait(self: &Arc<Self>, manager: M, options: WaitOptions) -> Result<bool> {
        self.enqueue(manager, &options, TimeoutMode::ReturnFalse).await
    }

    /// Wait for an acquisition; an expired timeout is an error
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait), plus [`WaitError::TimedOut`].
    pub async fn wait_or_timeout(self: &Arc<Self>, manager: M, options: WaitOptions) -> Result<()> {
        self.enqueue(manager, &options, TimeoutMode::Fail)
            .await
            .map(|_| ())
    }

    fn enqueue(self: &Arc<Self>, manager: M, options: &WaitOptions, mode: TimeoutMode) -> Wait<Self> {
        let mut state = self.lock();
        if state.disposal != Disposal::Active {
            return Wait::ready(Err(WaitError::Disposed), mode);
        }
        if options.is_cancellation_requested() {
            return Wait::ready(Err(WaitError::Canceled), mode);
        }
        if state.try_acquire(&manager) {
            return Wait::ready(Ok(true), mode);
        }
        if options.timeout.is_zero() {
            return Wait::ready(mode.outcome(Resolution::TimedOut), mode);
        }

        let tag = options.tag.clone().filter(|_| self.track_callers);
        let Some(node) = state
            .waiters
            .enqueue(tag, |node| manager.initialize_node(node))
        else {
            return Wait::ready(
                Err(WaitError::InvalidOperation("waiter node could not be linked")),
                mode,
            );
        };
        let queued = state.waiters.len();
        drop(state);

        if let Some(counters) = &self.counters {
            counters.record_contention();
        }
        trace!(index = node.index, queued, "waiter enqueued");
        Wait::queued(Arc::clone(self), node, options, mode)
    }

    /// Mutate the shared state, then grant eligible waiters
    ///
    /// This is how primitives release: the closure records the release and
    /// the engine resumes queued waiters head-to-tail. A pending
    /// asynchronous disposal finalizes here once the state reports ready.
    pub fn release_with<T>(&self, release: impl FnOnce(&mut M::State) -> T) -> T {
        let mut wakers = WakeList::new();
        let result = {
            let mut state = self.lock();
            let result = release(&mut state.lock);
            state.resume_pending(&mut wakers);
            state.try_finalize(&mut wakers);
            result
        };
        wakers.wake_all();
        result
    }

    /// Mutate the shared state, then hand off to every queued waiter
    ///
    /// Used by broadcast primitives; no `acquire_lock` is applied to the
    /// resumed waiters. Returns how many waiters were resumed.
    pub fn resume_all_with(&self, update: impl FnOnce(&mut M::State)) -> usize {
        let mut wakers = WakeList::new();
        let resumed = {
            let mut state = self.lock();
            update(&mut state.lock);
            state.waiters.drain(&Drain::Succeed(true), &mut wakers)
        };
        wakers.wake_all();
        if resumed > 0 {
            debug!(resumed, "resumed all suspended callers");
        }
        resumed
    }

    /// Hand off to every queued waiter
    pub fn resume_all(&self) -> usize {
        self.resume_all_with(|_| {})
    }

    /// Read the shared state inside the exclusive section
    pub fn read_state<T>(&self, read: impl FnOnce(&M::State) -> T) -> T {
        read(&self.lock().lock)
    }

    /// Cancel every queued waiter
    ///
    /// Returns how many waiters were canceled.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::InvalidArgument`] if `reason` has not been
    /// canceled.
    pub fn cancel_suspended_callers(&self, reason: &CancellationToken) -> Result<usize> {
        if !reason.is_cancelled() {
            return Err(WaitError::InvalidArgument(
                "cancellation reason must already be canceled",
            ));
        }
        let mut wakers = WakeList::new();
        let canceled = self.lock().waiters.drain(&Drain::Cancel, &mut wakers);
        wakers.wake_all();
        debug!(canceled, "canceled suspended callers");
        Ok(canceled)
    }

    /// Dispose synchronously
    ///
    /// Every queued and future waiter fails with [`WaitError::Disposed`].
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::InvalidArgument`] if disposal was already
    /// requested.
    pub fn dispose(&self) -> Result<()> {
        let mut wakers = WakeList::new();
        {
            let mut state = self.lock();
            if state.disposal != Disposal::Active {
                return Err(WaitError::InvalidArgument("synchronizer already disposed"));
            }
            let drained = state
                .waiters
                .drain(&Drain::Fail(WaitError::Disposed), &mut wakers);
            state.disposal = Disposal::Finalized;
            debug!(drained, "synchronizer disposed");
        }
        wakers.wake_all();
        Ok(())
    }

    /// Dispose, completing once the state reports it is safe to finalize
    ///
    /// Queued waiters fail with [`WaitError::Disposed`] immediately; the
    /// returned future waits for holders (e.g. of a lock) to release.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::InvalidArgument`] if disposal was already
    /// requested.
    pub async fn dispose_async(&self) -> Result<()> {
        let mut wakers = WakeList::new();
        {
            let mut state = self.lock();
            if state.disposal != Disposal::Active {
                return Err(WaitError::InvalidArgument("synchronizer already disposed"));
            }
            let drained = state
                .waiters
                .drain(&Drain::Fail(WaitError::Disposed), &mut wakers);
            state.disposal = Disposal::Requested;
            state.try_finalize(&mut wakers);
            let finalized = state.disposal == Disposal::Finalized;
            debug!(drained, finalized, "disposal requested");
        }
        wakers.wake_all();
        DisposeWait { sync: self }.await;
        Ok(())
    }

    /// Check if disposal was requested
    pub fn is_disposed(&self) -> bool {
        self.lock().disposal != Disposal::Active
    }

    /// Number of queued waiters
    pub fn queue_len(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Caller tags of queued waiters in queue order
    ///
    /// Empty unless the engine was built with caller tracking.
    pub fn suspended_callers(&self) -> Vec<CallerTag> {
        if !self.track_callers {
            return Vec::new();
        }
        self.lock().waiters.tags()
    }

    /// Counter values, if counters were configured
    pub fn counters(&self) -> Option<CounterSnapshot> {
        self.counters.as_ref().map(|counters| counters.snapshot())
    }

    fn record_resolution(&self, detached: &Detached<M>) {
        if let (Some(counters), Resolution::Succeeded(_)) = (&self.counters, &detached.resolution) {
            counters.record_wait(detached.waited);
        }
    }
}

impl<M: LockManager> WaitHost for QueuedSynchronizer<M> {
    fn poll_node(&self, node: NodeHandle, waker: &Waker) -> Option<Resolution> {
        let detached = self.lock().waiters.observe(node, waker)?;
        self.record_resolution(&detached);
        Some(detached.resolution)
    }

    fn expire(&self, node: NodeHandle, resolution: Resolution) -> Resolution {
        let mut wakers = WakeList::new();
        let detached = {
            let mut state = self.lock();
            if state.waiters.resolve(node, resolution) {
                trace!(index = node.index, "waiter expired");
                // The expired waiter may have been blocking later ones
                state.resume_pending(&mut wakers);
            }
            state.waiters.recycle(node)
        };
        wakers.wake_all();
        self.record_resolution(&detached);
        detached.resolution
    }

    fn abandon(&self, node: NodeHandle) {
        let mut wakers = WakeList::new();
        {
            let mut state = self.lock();
            state.waiters.resolve(node, Resolution::Canceled);
            let detached = state.waiters.recycle(node);
            if detached.granted {
                if let Some(manager) = &detached.request {
                    warn!(index = node.index, "granted waiter dropped; returning its acquisition");
                    manager.release_lock(&mut state.lock);
                }
            }
            state.resume_pending(&mut wakers);
            state.try_finalize(&mut wakers);
        }
        wakers.wake_all();
    }
}

/// Completes when a requested disposal has been finalized
struct DisposeWait<'a, M: LockManager> {
    sync: &'a QueuedSynchronizer<M>,
}

impl<M: LockManager> Future for DisposeWait<'_, M> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.sync.lock();
        if state.disposal == Disposal::Finalized {
            return Poll::Ready(());
        }
        if !state.dispose_wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.dispose_wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
