//! Update Scheduler
//!
//! Effects never run at the moment they are invalidated. The invalidation walk
//! enqueues them here and the runtime drains the queue once the outermost batch
//! (or the triggering write) completes.
//!
//! # Algorithm
//!
//! 1. `enqueue` appends a node unless its `QUEUED` bit is already set, so one
//!    external write can never schedule the same effect twice.
//! 2. A flush detaches the whole queue and walks it in FIFO order.
//! 3. Effects that write signals while running enqueue into a fresh queue,
//!    which the flush picks up as its next pass. The drain is a loop, never
//!    recursion, and the runtime caps the number of passes.

use std::collections::VecDeque;

use super::node::{Flags, NodeId};
use super::Graph;

/// FIFO queue of consumers waiting for a run.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    queue: VecDeque<NodeId>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Detach the pending pass, leaving an empty queue for nodes enqueued
    /// while it runs.
    pub(crate) fn take(&mut self) -> VecDeque<NodeId> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Graph {
    /// Append a node to the scheduler unless it is already queued.
    ///
    /// Returns whether the node was added.
    pub(crate) fn enqueue(&mut self, id: NodeId) -> bool {
        let Some(node) = self.get_mut(id) else {
            return false;
        };
        if node.flags.contains(Flags::QUEUED) {
            return false;
        }
        node.flags.insert(Flags::QUEUED);
        self.scheduler.queue.push_back(id);
        true
    }

    /// Clear the queued bit as a node leaves the queue.
    ///
    /// Returns whether the node is still worth running.
    pub(crate) fn dequeue(&mut self, id: NodeId) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.flags.remove(Flags::QUEUED);
                !node.flags.contains(Flags::DISPOSED)
            }
            None => false,
        }
    }

    /// Drop a pass without running it.
    ///
    /// The nodes keep `OUTDATED` so that the next invalidation reaches them and
    /// they run in full.
    pub(crate) fn abandon(&mut self, pass: VecDeque<NodeId>) {
        for id in pass.into_iter().chain(self.scheduler.take()) {
            if let Some(node) = self.get_mut(id) {
                node.flags.remove(Flags::QUEUED | Flags::NOTIFIED);
                node.flags.insert(Flags::OUTDATED);
            }
        }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
