//! Intrusive FIFO wait queue
//!
//! Nodes are linked through the `prev`/`next` slot indices stored in the
//! nodes themselves, giving O(1) append and O(1) removal from the middle.
//! The queue performs no locking; every call must happen inside the owner's
//! exclusive section, and a node is linked into at most one queue.

use crate::error::WaitError;
use crate::node::{NodeHandle, Resolution};
use crate::pool::NodePool;
use std::task::Waker;

/// Bulk resolution applied by [`WaitQueue::drain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drain {
    /// Resolve every waiter as canceled
    Cancel,
    /// Hand off to every waiter with the given value
    Succeed(bool),
    /// Fail every waiter with the given error
    Fail(WaitError),
}

impl Drain {
    fn resolution(&self) -> Resolution {
        match self {
            Self::Cancel => Resolution::Canceled,
            Self::Succeed(value) => Resolution::Succeeded(*value),
            Self::Fail(error) => Resolution::Faulted(error.clone()),
        }
    }
}

/// Wakers collected inside an exclusive section, woken after it is left
#[derive(Debug, Default)]
pub(crate) struct WakeList(Vec<Waker>);

impl WakeList {
    pub(crate) const fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, waker: Option<Waker>) {
        if let Some(waker) = waker {
            self.0.push(waker);
        }
    }

    pub(crate) fn wake_all(self) {
        for waker in self.0 {
            waker.wake();
        }
    }
}

/// Doubly-linked FIFO list of waiter nodes
#[derive(Debug, Default)]
pub struct WaitQueue {
    first: Option<usize>,
    last: Option<usize>,
    len: usize,
}

impl WaitQueue {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first: None,
            last: None,
            len: 0,
        }
    }

    /// Number of linked nodes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if no node is linked
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Handle of the head node
    #[must_use]
    pub fn first<R>(&self, pool: &NodePool<R>) -> Option<NodeHandle> {
        self.first.map(|index| pool.handle_at(index))
    }

    /// Link `handle` as the new tail
    ///
    /// Returns `false` if the handle is stale or the node is already linked.
    pub fn append<R>(&mut self, pool: &mut NodePool<R>, handle: NodeHandle) -> bool {
        match pool.get_mut(handle) {
            Some(node) if !node.linked => {
                node.prev = self.last;
                node.next = None;
                node.linked = true;
            }
            _ => return false,
        }

        match self.last {
            Some(tail) => pool.slot_mut(tail).next = Some(handle.index),
            None => self.first = Some(handle.index),
        }
        self.last = Some(handle.index);
        self.len += 1;
        true
    }

    /// Unlink `handle`, re-linking its neighbors
    ///
    /// Returns `false` if the handle is stale or the node is not linked.
    pub fn remove<R>(&mut self, pool: &mut NodePool<R>, handle: NodeHandle) -> bool {
        let (prev, next) = match pool.get_mut(handle) {
            Some(node) if node.linked => {
                let links = (node.prev.take(), node.next.take());
                node.linked = false;
                links
            }
            _ => return false,
        };

        match prev {
            Some(prev) => pool.slot_mut(prev).next = next,
            None => self.first = next,
        }
        match next {
            Some(next) => pool.slot_mut(next).prev = prev,
            None => self.last = prev,
        }
        self.len -= 1;
        true
    }

    /// Resolve and detach every node, leaving the queue empty
    ///
    /// Nodes that were already resolved are detached without being counted.
    /// Returns the number of nodes resolved by this drain.
    pub(crate) fn drain<R>(
        &mut self,
        pool: &mut NodePool<R>,
        drain: &Drain,
        wakers: &mut WakeList,
    ) -> usize {
        let mut resolved = 0;
        let mut cursor = self.first.take();
        self.last = None;
        self.len = 0;

        while let Some(index) = cursor {
            let node = pool.slot_mut(index);
            cursor = node.next.take();
            node.prev = None;
            node.linked = false;
            if node.try_resolve(drain.resolution()) {
                resolved += 1;
                wakers.push(node.take_waker());
            }
        }
        resolved
    }

    /// Handles of the linked nodes, head to tail
    pub fn handles<R>(&self, pool: &NodePool<R>) -> Vec<NodeHandle> {
        let mut handles = Vec::with_capacity(self.len);
        let mut cursor = self.first;
        while let Some(index) = cursor {
            handles.push(pool.handle_at(index));
            cursor = pool.slot(index).next;
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(pool: &mut NodePool<u32>, count: u32) -> (WaitQueue, Vec<NodeHandle>) {
        let mut queue = WaitQueue::new();
        let handles: Vec<_> = (0..count)
            .map(|i| {
                let handle = pool.acquire();
                pool.get_mut(handle).unwrap().set_request(i);
                assert!(queue.append(pool, handle));
                handle
            })
            .collect();
        (queue, handles)
    }

    fn requests(queue: &WaitQueue, pool: &NodePool<u32>) -> Vec<u32> {
        queue
            .handles(pool)
            .into_iter()
            .map(|h| *pool.get(h).unwrap().request().unwrap())
            .collect()
    }

    #[test]
    fn test_append_preserves_fifo_order() {
        let mut pool = NodePool::new();
        let (queue, handles) = queue_with(&mut pool, 3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.first(&pool), Some(handles[0]));
        assert_eq!(requests(&queue, &pool), vec![0, 1, 2]);
    }

    #[test]
    fn test_append_twice_is_rejected() {
        let mut pool = NodePool::new();
        let (mut queue, handles) = queue_with(&mut pool, 1);
        assert!(!queue.append(&mut pool, handles[0]));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_middle() {
        let mut pool = NodePool::new();
        let (mut queue, handles) = queue_with(&mut pool, 3);

        assert!(queue.remove(&mut pool, handles[1]));

        assert_eq!(queue.len(), 2);
        assert_eq!(requests(&queue, &pool), vec![0, 2]);
        let detached = pool.get(handles[1]).unwrap();
        assert!(!detached.is_linked());
        assert!(detached.prev.is_none() && detached.next.is_none());
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut pool = NodePool::new();
        let (mut queue, handles) = queue_with(&mut pool, 3);

        assert!(queue.remove(&mut pool, handles[0]));
        assert_eq!(queue.first(&pool), Some(handles[1]));

        assert!(queue.remove(&mut pool, handles[2]));
        assert_eq!(requests(&queue, &pool), vec![1]);

        assert!(queue.remove(&mut pool, handles[1]));
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.first(&pool).is_none());
    }

    #[test]
    fn test_remove_unlinked_is_noop() {
        let mut pool = NodePool::new();
        let (mut queue, handles) = queue_with(&mut pool, 2);
        assert!(queue.remove(&mut pool, handles[0]));
        assert!(!queue.remove(&mut pool, handles[0]));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_resolves_every_pending_node() {
        let mut pool = NodePool::new();
        let (mut queue, handles) = queue_with(&mut pool, 3);
        pool.get_mut(handles[1])
            .unwrap()
            .try_resolve(Resolution::TimedOut);

        let mut wakers = WakeList::new();
        let resolved = queue.drain(&mut pool, &Drain::Fail(WaitError::Disposed), &mut wakers);

        assert_eq!(resolved, 2);
        assert!(queue.is_empty());
        assert_eq!(
            pool.get(handles[0]).unwrap().resolution(),
            &Resolution::Faulted(WaitError::Disposed)
        );
        assert_eq!(
            pool.get(handles[1]).unwrap().resolution(),
            &Resolution::TimedOut
        );
        assert!(handles
            .iter()
            .all(|h| !pool.get(*h).unwrap().is_linked()));
    }

    #[test]
    fn test_queue_reusable_after_drain() {
        let mut pool = NodePool::new();
        let (mut queue, _) = queue_with(&mut pool, 2);
        queue.drain(&mut pool, &Drain::Cancel, &mut WakeList::new());

        let handle = pool.acquire();
        assert!(queue.append(&mut pool, handle));
        assert_eq!(queue.first(&pool), Some(handle));
        assert_eq!(queue.len(), 1);
    }
}
