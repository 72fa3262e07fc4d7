//! Node pool
//!
//! An arena of [`WaitNode`]s plus a free list. The pool grows on demand and
//! recycles released slots, so steady-state waits do not allocate.

use crate::node::{NodeHandle, WaitNode};

/// Bounded-growth factory and recycler for waiter nodes
#[derive(Debug)]
pub struct NodePool<R> {
    slots: Vec<WaitNode<R>>,
    free: Vec<usize>,
}

impl<R> Default for NodePool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> NodePool<R> {
    /// Create an empty pool
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Create a pool with `capacity` preallocated nodes
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let slots: Vec<WaitNode<R>> = (0..capacity).map(|_| WaitNode::new()).collect();
        // Reversed so the lowest slot is handed out first
        let free = (0..capacity).rev().collect();
        Self { slots, free }
    }

    /// Hand out a pending node, recycled when possible
    pub fn acquire(&mut self) -> NodeHandle {
        let index = self.free.pop().unwrap_or_else(|| {
            self.slots.push(WaitNode::new());
            self.slots.len() - 1
        });
        NodeHandle {
            index,
            generation: self.slots[index].generation(),
        }
    }

    /// Return a resolved, detached node to the pool
    ///
    /// Returns `false` if the handle is stale or the node is still linked.
    pub fn release(&mut self, handle: NodeHandle) -> bool {
        match self.get_mut(handle) {
            Some(node) if !node.is_linked() => {
                node.reset();
                self.free.push(handle.index);
                true
            }
            _ => false,
        }
    }

    /// Look up a node by handle
    #[must_use]
    pub fn get(&self, handle: NodeHandle) -> Option<&WaitNode<R>> {
        self.slots
            .get(handle.index)
            .filter(|node| node.generation() == handle.generation)
    }

    /// Look up a node by handle for mutation
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut WaitNode<R>> {
        self.slots
            .get_mut(handle.index)
            .filter(|node| node.generation() == handle.generation)
    }

    /// Current handle of the node in slot `index`
    pub(crate) fn handle_at(&self, index: usize) -> NodeHandle {
        NodeHandle {
            index,
            generation: self.slots[index].generation(),
        }
    }

    pub(crate) fn slot(&self, index: usize) -> &WaitNode<R> {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut WaitNode<R> {
        &mut self.slots[index]
    }

    /// Total number of nodes ever allocated
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Number of nodes ready for reuse
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of nodes currently handed out
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
