//! The suspended-wait machinery shared by the synchronizer and the pipe
//!
//! [`Waiters`] bundles a node pool with its wait queue and implements the
//! node lifecycle on top of them. [`Wait`] is the future a suspended caller
//! polls: it races the node's resolution against its timeout and its
//! cancellation token, and unlinks the node when dropped early.
//!
//! All `Waiters` methods assume the owner's exclusive section is held.

use crate::diagnostics::CallerTag;
use crate::error::{Result, WaitError};
use crate::node::{NodeHandle, Resolution, WaitNode};
use crate::options::WaitOptions;
use crate::pool::NodePool;
use crate::queue::{Drain, WaitQueue, WakeList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Sleep;
use tokio_util::sync::WaitForCancellationFutureOwned;

/// A node pool plus the queue its nodes are linked into
#[derive(Debug)]
pub(crate) struct Waiters<R> {
    pub(crate) pool: NodePool<R>,
    pub(crate) queue: WaitQueue,
}

/// What is left of a node once it has been unlinked and recycled
#[derive(Debug)]
pub(crate) struct Detached<R> {
    pub(crate) resolution: Resolution,
    pub(crate) request: Option<R>,
    pub(crate) granted: bool,
    pub(crate) waited: Duration,
}

impl<R> Detached<R> {
    fn lost() -> Self {
        Self {
            resolution: Resolution::Faulted(WaitError::InvalidOperation(
                "waiter node was recycled before it was observed",
            )),
            request: None,
            granted: false,
            waited: Duration::ZERO,
        }
    }
}

impl<R> Waiters<R> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: NodePool::with_capacity(capacity),
            queue: WaitQueue::new(),
        }
    }

    /// Pull a node from the pool, stamp it and link it at the tail
    pub(crate) fn enqueue(
        &mut self,
        tag: Option<CallerTag>,
        initialize: impl FnOnce(&mut WaitNode<R>),
    ) -> Option<NodeHandle> {
        let handle = self.pool.acquire();
        let node = self.pool.get_mut(handle)?;
        node.set_tag(tag);
        initialize(node);
        if self.queue.append(&mut self.pool, handle) {
            Some(handle)
        } else {
            self.pool.release(handle);
            None
        }
    }

    /// Recycle the node if it is resolved, otherwise remember `waker`
    pub(crate) fn observe(&mut self, handle: NodeHandle, waker: &Waker) -> Option<Detached<R>> {
        match self.pool.get_mut(handle) {
            None => Some(Detached::lost()),
            Some(node) if node.is_pending() => {
                node.register_waker(waker);
                None
            }
            Some(_) => Some(self.recycle(handle)),
        }
    }

    /// Resolve a node first-writer-wins, unlinking it if this call won
    pub(crate) fn resolve(&mut self, handle: NodeHandle, resolution: Resolution) -> bool {
        let won = self
            .pool
            .get_mut(handle)
            .is_some_and(|node| node.try_resolve(resolution));
        if won {
            self.queue.remove(&mut self.pool, handle);
        }
        won
    }

    /// Unlink (if still linked) and return a node to the pool
    pub(crate) fn recycle(&mut self, handle: NodeHandle) -> Detached<R> {
        self.queue.remove(&mut self.pool, handle);
        let Some(node) = self.pool.get_mut(handle) else {
            return Detached::lost();
        };
        let detached = Detached {
            resolution: node.resolution().clone(),
            request: node.take_request(),
            granted: node.is_granted(),
            waited: node.elapsed(),
        };
        self.pool.release(handle);
        detached
    }

    /// Unlink already-resolved nodes sitting at the head of the queue
    pub(crate) fn remove_resolved_head(&mut self) {
        while let Some(head) = self.queue.first(&self.pool) {
            if self.pool.get(head).is_some_and(WaitNode::is_pending) {
                break;
            }
            self.queue.remove(&mut self.pool, head);
        }
    }

    /// Hand `value` to the earliest pending waiter
    pub(crate) fn resume_first(&mut self, value: bool, wakers: &mut WakeList) -> bool {
        self.remove_resolved_head();
        let Some(head) = self.queue.first(&self.pool) else {
            return false;
        };
        let resumed = self.resolve(head, Resolution::Succeeded(value));
        if resumed {
            wakers.push(self.pool.get_mut(head).and_then(WaitNode::take_waker));
        }
        resumed
    }

    pub(crate) fn drain(&mut self, drain: &Drain, wakers: &mut WakeList) -> usize {
        self.queue.drain(&mut self.pool, drain, wakers)
    }

    /// Tags of queued nodes, head to tail
    pub(crate) fn tags(&self) -> Vec<CallerTag> {
        self.queue
            .handles(&self.pool)
            .into_iter()
            .filter_map(|handle| self.pool.get(handle).and_then(|node| node.tag().cloned()))
            .collect()
    }

    pub(crate) const fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Owner of a wait queue, as seen by a suspended [`Wait`]
///
/// Every method enters the owner's exclusive section and wakes collected
/// wakers only after leaving it.
pub(crate) trait WaitHost: Send + Sync + 'static {
    /// Recycle the node and return its resolution, or register `waker`
    fn poll_node(&self, node: NodeHandle, waker: &Waker) -> Option<Resolution>;

    /// Resolve the node with a timeout or cancellation outcome
    ///
    /// Returns whichever resolution won the race and recycles the node.
    fn expire(&self, node: NodeHandle, resolution: Resolution) -> Resolution;

    /// The waiting future was dropped before it observed its resolution
    fn abandon(&self, node: NodeHandle);
}

/// How an expired timeout is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeoutMode {
    /// `Ok(false)`
    ReturnFalse,
    /// `Err(WaitError::TimedOut)`
    Fail,
}

impl TimeoutMode {
    pub(crate) fn outcome(self, resolution: Resolution) -> Result<bool> {
        match resolution {
            Resolution::Succeeded(value) => Ok(value),
            Resolution::TimedOut => match self {
                Self::ReturnFalse => Ok(false),
                Self::Fail => Err(WaitError::TimedOut),
            },
            Resolution::Canceled => Err(WaitError::Canceled),
            Resolution::Faulted(error) => Err(error),
            Resolution::Pending => Err(WaitError::InvalidOperation(
                "wait completed without a resolution",
            )),
        }
    }
}

/// Future of one wait, ready immediately or parked on a queued node
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub(crate) struct Wait<H: WaitHost> {
    state: WaitState<H>,
    mode: TimeoutMode,
}

enum WaitState<H: WaitHost> {
    Ready(Result<bool>),
    Queued(Queued<H>),
    Done,
}

struct Queued<H: WaitHost> {
    host: Arc<H>,
    node: NodeHandle,
    deadline: Option<Pin<Box<Sleep>>>,
    cancellation: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    /// The node was observed or expired; nothing to abandon on drop
    settled: bool,
}

impl<H: WaitHost> Wait<H> {
    pub(crate) const fn ready(result: Result<bool>, mode: TimeoutMode) -> Self {
        Self {
            state: WaitState::Ready(result),
            mode,
        }
    }

    /// Park on `node`; the timeout clock starts now
    ///
    /// A finite timeout needs a tokio runtime for its timer. Without one the
    /// node is abandoned and the wait fails with an invalid operation.
    pub(crate) fn queued(
        host: Arc<H>,
        node: NodeHandle,
        options: &WaitOptions,
        mode: TimeoutMode,
    ) -> Self {
        let deadline = match options.timeout.duration() {
            Some(_) if Handle::try_current().is_err() => {
                host.abandon(node);
                return Self::ready(
                    Err(WaitError::InvalidOperation("a finite timeout requires a tokio runtime")),
                    mode,
                );
            }
            Some(duration) => Some(Box::pin(tokio::time::sleep(duration))),
            None => None,
        };
        let cancellation = options
            .cancellation
            .clone()
            .map(|token| Box::pin(token.cancelled_owned()));
        Self {
            state: WaitState::Queued(Queued {
                host,
                node,
                deadline,
                cancellation,
                settled: false,
            }),
            mode,
        }
    }
}

impl<H: WaitHost> Queued<H> {
    fn poll_resolution(&mut self, cx: &mut Context<'_>) -> Option<Resolution> {
        let resolution = self.poll_sources(cx)?;
        self.settled = true;
        Some(resolution)
    }

    fn poll_sources(&mut self, cx: &mut Context<'_>) -> Option<Resolution> {
        if let Some(resolution) = self.host.poll_node(self.node, cx.waker()) {
            return Some(resolution);
        }
        if let Some(cancellation) = &mut self.cancellation {
            if cancellation.as_mut().poll(cx).is_ready() {
                return Some(self.host.expire(self.node, Resolution::Canceled));
            }
        }
        if let Some(deadline) = &mut self.deadline {
            if deadline.as_mut().poll(cx).is_ready() {
                return Some(self.host.expire(self.node, Resolution::TimedOut));
            }
        }
        None
    }
}

impl<H: WaitHost> Drop for Queued<H> {
    fn drop(&mut self) {
        if !self.settled {
            self.host.abandon(self.node);
        }
    }
}

impl<H: WaitHost> Future for Wait<H> {
    type Output = Result<bool>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            WaitState::Ready(_) => {
                if let WaitState::Ready(result) = std::mem::replace(&mut this.state, WaitState::Done) {
                    return Poll::Ready(result);
                }
                Poll::Ready(Err(WaitError::InvalidOperation("wait polled after completion")))
            }
            WaitState::Queued(queued) => match queued.poll_resolution(cx) {
                Some(resolution) => {
                    this.state = WaitState::Done;
                    Poll::Ready(this.mode.outcome(resolution))
                }
                None => Poll::Pending,
            },
            WaitState::Done => Poll::Ready(Err(WaitError::InvalidOperation(
                "wait polled after completion",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_mode_outcomes() {
        assert_eq!(TimeoutMode::Fail.outcome(Resolution::Succeeded(true)), Ok(true));
        assert_eq!(TimeoutMode::ReturnFalse.outcome(Resolution::TimedOut), Ok(false));
        assert_eq!(
            TimeoutMode::Fail.outcome(Resolution::TimedOut),
            Err(WaitError::TimedOut)
        );
        assert_eq!(
            TimeoutMode::ReturnFalse.outcome(Resolution::Canceled),
            Err(WaitError::Canceled)
        );
        assert_eq!(
            TimeoutMode::ReturnFalse.outcome(Resolution::Faulted(WaitError::Disposed)),
            Err(WaitError::Disposed)
        );
    }

    #[test]
    fn test_enqueue_observe_recycle() {
        let mut waiters = Waiters::<u8>::with_capacity(0);
        let handle = waiters
            .enqueue(Some(CallerTag::from("a")), |node| node.set_request(7))
            .unwrap();
        assert_eq!(waiters.len(), 1);
        assert_eq!(waiters.tags(), vec![CallerTag::from("a")]);

        let waker = futures::task::noop_waker();
        assert!(waiters.observe(handle, &waker).is_none());

        assert!(waiters.resolve(handle, Resolution::Succeeded(true)));
        assert!(!waiters.resolve(handle, Resolution::TimedOut));
        assert_eq!(waiters.len(), 0);

        let detached = waiters.observe(handle, &waker).unwrap();
        assert_eq!(detached.resolution, Resolution::Succeeded(true));
        assert_eq!(detached.request, Some(7));
        assert_eq!(waiters.pool.available(), 1);
    }

    #[test]
    fn test_resume_first_skips_resolved_head() {
        let mut waiters = Waiters::<()>::with_capacity(0);
        let first = waiters.enqueue(None, |_| {}).unwrap();
        let second = waiters.enqueue(None, |_| {}).unwrap();
        waiters
            .pool
            .get_mut(first)
            .unwrap()
            .try_resolve(Resolution::Canceled);

        let mut wakers = WakeList::new();
        assert!(waiters.resume_first(true, &mut wakers));

        assert!(waiters.queue.is_empty());
        assert_eq!(
            waiters.pool.get(second).unwrap().resolution(),
            &Resolution::Succeeded(true)
        );
    }
}
