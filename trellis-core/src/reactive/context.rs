//! Reactive Context
//!
//! The reactive context tracks which computation is currently running, the
//! global version counter and the batch depth. This enables automatic
//! dependency tracking: when a producer is read, the current consumer (if it
//! is actually executing) gets an edge to it.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns exactly one context next to its
//! graph. Entering a consumer swaps it into `current` and the previous value
//! is restored when the run finishes, which gives nested computations (a
//! computed reading another computed) a stack discipline without a stack.

use crate::graph::{Flags, Graph, NodeId, NodeKind};

/// Per-runtime mutable state shared by every primitive.
#[derive(Debug, Default)]
pub(crate) struct ReactiveContext {
    /// The consumer whose body is executing, if any.
    pub(crate) current: Option<NodeId>,

    /// Bumped on every effective signal write anywhere in the graph.
    pub(crate) version: u64,

    /// Open batches. Flushing waits until this returns to zero.
    pub(crate) batch_depth: u32,

    /// Set while the scheduler is draining, to keep flushes from nesting.
    pub(crate) flushing: bool,

    /// Consumers whose bodies are on the call stack, outermost first.
    running: Vec<NodeId>,
}

impl ReactiveContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The consumer a read should be recorded against.
    ///
    /// Only a consumer that is actually running tracks; anything else (an
    /// untracked scope, a cleanup, a stale id) reads without linking.
    pub(crate) fn tracking_consumer(&self, graph: &Graph) -> Option<NodeId> {
        let id = self.current?;
        graph
            .get(id)
            .filter(|node| node.flags.contains(Flags::RUNNING))
            .map(|_| id)
    }

    /// The computed currently evaluating, if the innermost consumer is one.
    pub(crate) fn evaluating_computed(&self, graph: &Graph) -> Option<NodeId> {
        let id = self.tracking_consumer(graph)?;
        graph
            .get(id)
            .filter(|node| matches!(node.kind, NodeKind::Computed(_)))
            .map(|_| id)
    }

    /// Swap the current consumer, returning the previous one.
    pub(crate) fn enter(&mut self, consumer: Option<NodeId>) -> Option<NodeId> {
        std::mem::replace(&mut self.current, consumer)
    }

    /// Record that `id` started executing and make it the current consumer.
    pub(crate) fn push_running(&mut self, id: NodeId) -> Option<NodeId> {
        self.running.push(id);
        self.enter(Some(id))
    }

    /// Undo [`push_running`](Self::push_running).
    pub(crate) fn pop_running(&mut self, id: NodeId, previous: Option<NodeId>) {
        if let Some(pos) = self.running.iter().rposition(|&running| running == id) {
            self.running.truncate(pos);
        }
        self.enter(previous);
    }

    /// The chain of executing consumers from `node` inwards, closed by
    /// `node` itself. Just `[node]` if it is not executing.
    pub(crate) fn cycle_path(&self, node: NodeId) -> Vec<NodeId> {
        let start = self
            .running
            .iter()
            .position(|&running| running == node)
            .unwrap_or(self.running.len());
        let mut path = self.running[start..].to_vec();
        path.push(node);
        path
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Bump the global version, returning the new value.
    pub(crate) fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
