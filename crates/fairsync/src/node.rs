//! Waiter nodes
//!
//! A [`WaitNode`] represents one suspended caller. Nodes live in a
//! [`NodePool`](crate::pool::NodePool) arena and are linked into a
//! [`WaitQueue`](crate::queue::WaitQueue) by slot index, never by pointer.
//!
//! # Lifecycle
//!
//! ```text
//! pool.acquire() -> Pending -> (linked) -> resolved exactly once -> (unlinked)
//!                -> observed by the waiting future -> pool.release()
//! ```
//!
//! Resolution is first-writer-wins: a timeout racing a release resolves the
//! node once, and the loser's attempt is a no-op that reports "already
//! resolved".

use crate::diagnostics::CallerTag;
use crate::error::WaitError;
use std::task::Waker;
use std::time::{Duration, Instant};

/// Resolution state of a waiter node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Still waiting
    Pending,
    /// Handed off successfully; the flag is the value delivered to the waiter
    Succeeded(bool),
    /// Canceled by a token, a bulk cancel or an abandoned future
    Canceled,
    /// Timed out
    TimedOut,
    /// Failed, e.g. because the owner was disposed
    Faulted(WaitError),
}

impl Resolution {
    /// Check if the node is still waiting
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Stable reference to a pooled node
///
/// The generation changes every time the slot is recycled, so a handle held
/// past its node's lifetime no longer resolves to anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// One suspended caller
#[derive(Debug)]
pub struct WaitNode<R> {
    resolution: Resolution,
    /// Previous node in the owning queue
    pub(crate) prev: Option<usize>,
    /// Next node in the owning queue
    pub(crate) next: Option<usize>,
    /// Set while the node is in a queue
    pub(crate) linked: bool,
    generation: u64,
    created_at: Instant,
    tag: Option<CallerTag>,
    waker: Option<Waker>,
    request: Option<R>,
    /// The owner applied its acquisition on behalf of this node
    granted: bool,
}

impl<R> WaitNode<R> {
    pub(crate) fn new() -> Self {
        Self {
            resolution: Resolution::Pending,
            prev: None,
            next: None,
            linked: false,
            generation: 0,
            created_at: Instant::now(),
            tag: None,
            waker: None,
            request: None,
            granted: false,
        }
    }

    /// Clear a released node for its next use
    pub(crate) fn reset(&mut self) {
        debug_assert!(!self.linked, "resetting a node that is still linked");
        self.resolution = Resolution::Pending;
        self.prev = None;
        self.next = None;
        self.generation = self.generation.wrapping_add(1);
        self.created_at = Instant::now();
        self.tag = None;
        self.waker = None;
        self.request = None;
        self.granted = false;
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    /// Current resolution
    #[must_use]
    pub const fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Check if the node is still waiting
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.resolution.is_pending()
    }

    /// Check if the node is in a queue
    #[must_use]
    pub const fn is_linked(&self) -> bool {
        self.linked
    }

    /// Time since the node was handed out by the pool
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Transition away from pending
    ///
    /// Returns `false` without touching the node if it is already resolved.
    pub fn try_resolve(&mut self, resolution: Resolution) -> bool {
        if !self.resolution.is_pending() || resolution.is_pending() {
            return false;
        }
        self.resolution = resolution;
        true
    }

    /// Store the owner-specific request carried by this node
    pub fn set_request(&mut self, request: R) {
        self.request = Some(request);
    }

    /// Owner-specific request carried by this node
    #[must_use]
    pub const fn request(&self) -> Option<&R> {
        self.request.as_ref()
    }

    pub(crate) fn take_request(&mut self) -> Option<R> {
        self.request.take()
    }

    /// Caller tag, if one was recorded
    #[must_use]
    pub const fn tag(&self) -> Option<&CallerTag> {
        self.tag.as_ref()
    }

    pub(crate) fn set_tag(&mut self, tag: Option<CallerTag>) {
        self.tag = tag;
    }

    pub(crate) const fn is_granted(&self) -> bool {
        self.granted
    }

    pub(crate) fn mark_granted(&mut self) {
        self.granted = true;
    }

    /// Remember the waker of the suspended future
    pub(crate) fn register_waker(&mut self, waker: &Waker) {
        match &mut self.waker {
            Some(current) if current.will_wake(waker) => {}
            slot => *slot = Some(waker.clone()),
        }
    }

    pub(crate) fn take_waker(&mut self) -> Option<Waker> {
        self.waker.take()
    }
}
