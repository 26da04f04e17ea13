//! Dependency Graph
//!
//! This module implements the bipartite graph of producers and consumers that
//! the reactive runtime maintains.
//!
//! # Overview
//!
//! - Nodes live in a generational arena addressed by [`NodeId`].
//! - Edges live in a second arena (see `edge`), recycled through a bounded
//!   pool (see `pool`). Producers and consumers hold only list heads; the edge
//!   records carry the sibling links.
//! - Effects waiting to run sit in a FIFO queue (see `scheduler`).
//!
//! # Design Decisions
//!
//! 1. The graph never calls user code. Anything that runs a computed, effect
//!    or subscription body lives in the runtime, which releases its borrow of
//!    the graph first.
//!
//! 2. Both graph walks (invalidation here, refresh in the runtime) use explicit
//!    stacks, so pathological chain lengths cannot overflow the call stack.
//!
//! 3. Every edge is linked into both lists for its whole life, so a write
//!    reaches every dependent eagerly and lazily evaluated nodes only need to
//!    compare per-edge versions.

mod edge;
mod node;
mod pool;
mod scheduler;

pub use node::NodeId;
pub use pool::DEFAULT_MAX_POOL_SIZE;

pub(crate) use edge::EdgeId;
pub(crate) use node::{Computation, Flags, Node, NodeKind, Status};

use smallvec::SmallVec;
use tracing::trace;

use scheduler::Scheduler;

/// One arena slot. The generation outlives the node so stale ids miss.
#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Consumers reached by an invalidation walk that must run before the write
/// returns.
pub(crate) type EagerSet = SmallVec<[NodeId; 4]>;

/// Outcome of one step of a refresh frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Every source matched its recorded version.
    Verified,

    /// The source under the cursor matched; continue with the next one.
    Advance(Option<EdgeId>),

    /// The source under the cursor changed; the frame's node must re-run.
    Changed,

    /// The source under the cursor is a stale computed; refresh it first.
    Descend(NodeId),

    /// The source under the cursor is executing right now.
    Cycle(NodeId),
}

/// The dependency graph: node arena, edge arena and scheduler queue.
#[derive(Debug)]
pub(crate) struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    edges: edge::EdgeArena,
    scheduler: Scheduler,
    /// Bumped whenever a node or an edge is removed.
    structure: u64,
}

impl Graph {
    /// Create an empty graph whose edge pool keeps at most `max_pool_size`
    /// idle edges.
    pub(crate) fn new(max_pool_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            edges: edge::EdgeArena::new(max_pool_size),
            scheduler: Scheduler::new(),
            structure: 0,
        }
    }

    /// Add a node to the graph.
    pub(crate) fn insert(&mut self, kind: NodeKind) -> NodeId {
        self.live += 1;
        let label = kind.label();
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(Node::new(kind));
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(Node::new(kind)),
                });
                NodeId::new(index, 0)
            }
        };
        trace!(node = %id, kind = label, "created node");
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also drops every edge touching it, in both directions. The kind is
    /// handed back so the caller can drop the body outside any borrow.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<NodeKind> {
        self.get(id)?;
        self.unlink_sources(id);
        self.unlink_targets(id);

        let slot = &mut self.slots[id.index() as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.live -= 1;
        self.structure += 1;
        Some(node.kind)
    }

    /// Get a reference to a node.
    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    /// Get a mutable reference to a node.
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    /// Access a node that list bookkeeping guarantees is live.
    fn node(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("node {id} is not live"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("node {id} is not live"),
        }
    }

    /// Get the total number of nodes in the graph.
    pub(crate) fn node_count(&self) -> usize {
        self.live
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn pooled_edges(&self) -> usize {
        self.edges.pool().len()
    }

    pub(crate) fn max_pool_size(&self) -> usize {
        self.edges.pool().max_size()
    }

    /// Counter of removals. Refresh frames are only re-anchored when it
    /// moved.
    pub(crate) fn structure(&self) -> u64 {
        self.structure
    }

    pub(crate) fn status(&self, id: NodeId, global_version: u64) -> Option<Status> {
        self.get(id).map(|node| node.status(global_version))
    }

    pub(crate) fn sources_tail(&self, id: NodeId) -> Option<EdgeId> {
        self.get(id).and_then(|node| node.sources_tail)
    }

    /// Mark every consumer downstream of a changed producer.
    ///
    /// Direct targets become `OUTDATED`, everything reachable becomes
    /// `NOTIFIED`. The walk is depth-first over an explicit stack and stops at
    /// nodes already notified. Effects are enqueued; subscriptions are
    /// returned for the caller to run before the write completes.
    pub(crate) fn invalidate(&mut self, source: NodeId) -> EagerSet {
        let mut eager = EagerSet::new();
        if !self
            .get(source)
            .is_some_and(|node| node.flags.contains(Flags::TRACKING))
        {
            return eager;
        }

        let mut stack: SmallVec<[(NodeId, bool); 16]> = SmallVec::new();
        self.push_targets(source, true, &mut stack);

        while let Some((id, direct)) = stack.pop() {
            let Some(node) = self.get_mut(id) else {
                continue;
            };
            if node.flags.contains(Flags::DISPOSED) {
                continue;
            }
            if direct {
                node.flags.insert(Flags::OUTDATED);
            }
            if node.flags.contains(Flags::NOTIFIED) {
                continue;
            }
            node.flags.insert(Flags::NOTIFIED);

            match node.kind {
                NodeKind::Computed(_) => self.push_targets(id, false, &mut stack),
                NodeKind::Effect(_) => {
                    self.enqueue(id);
                }
                NodeKind::Subscription(_) => eager.push(id),
                NodeKind::Signal => {}
            }
        }

        eager
    }

    /// Push targets so that the oldest one, at the list tail, is popped
    /// first. Effects on one producer are then queued in the order they
    /// subscribed.
    fn push_targets(&self, id: NodeId, direct: bool, stack: &mut SmallVec<[(NodeId, bool); 16]>) {
        stack.extend(self.targets_of(id).map(|target| (target, direct)));
    }

    /// Advance a refresh frame over the source under its cursor.
    pub(crate) fn step(&self, cursor: Option<EdgeId>, global_version: u64) -> Step {
        let Some(id) = cursor else {
            return Step::Verified;
        };
        let Some(edge) = self.edge(id) else {
            return Step::Changed;
        };
        let Some(source) = self.get(edge.source) else {
            return Step::Changed;
        };

        match source.status(global_version) {
            Status::Running => Step::Cycle(edge.source),
            Status::Dirty | Status::Check => Step::Descend(edge.source),
            Status::Fresh if edge.version == Some(source.version) => Step::Advance(edge.prev_source),
            Status::Fresh => Step::Changed,
        }
    }

    /// Clear the notification on nodes whose refresh was cut short by an
    /// error, so the next write walks through them again. `OUTDATED` stays.
    pub(crate) fn release_notified(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            if let Some(node) = self.get_mut(id) {
                node.flags.remove(Flags::NOTIFIED);
            }
        }
    }

    /// Record that a node was checked and found up to date.
    pub(crate) fn mark_verified(&mut self, id: NodeId, global_version: u64) {
        if let Some(node) = self.get_mut(id) {
            node.flags.remove(Flags::STALE);
            node.global_version = global_version;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::rc::Rc;

    use super::*;

    struct Noop;

    impl Computation for Noop {
        fn execute(&self) -> bool {
            true
        }
    }

    pub(crate) fn computed_node(graph: &mut Graph) -> NodeId {
        graph.insert(NodeKind::Computed(Rc::new(Noop)))
    }

    pub(crate) fn effect_node(graph: &mut Graph) -> NodeId {
        graph.insert(NodeKind::Effect(Rc::new(Noop)))
    }

    pub(crate) fn subscription_node(graph: &mut Graph) -> NodeId {
        graph.insert(NodeKind::Subscription(Rc::new(Noop)))
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new(8);
        let a = graph.insert(NodeKind::Signal);
        let b = computed_node(&mut graph);
        assert_eq!(graph.node_count(), 2);

        assert!(graph.remove(a).is_some());
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get(a).is_none());
        assert!(graph.get(b).is_some());

        // Removing twice is harmless
        assert!(graph.remove(a).is_none());
    }

    #[test]
    fn stale_ids_miss_reused_slots() {
        let mut graph = Graph::new(8);
        let a = graph.insert(NodeKind::Signal);
        graph.remove(a);
        let b = graph.insert(NodeKind::Signal);

        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(graph.get(a).is_none());
        assert!(graph.get(b).is_some());
    }

    #[test]
    fn removing_a_node_drops_its_edges() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        let c = computed_node(&mut graph);
        let e = effect_node(&mut graph);
        graph.add_dependency(s, c, 0);
        graph.add_dependency(c, e, 0);

        graph.remove(c);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.target_count(s), 0);
        assert_eq!(graph.source_count(e), 0);
    }

    #[test]
    fn invalidate_marks_transitively() {
        let mut graph = Graph::new(8);
        // s -> c1 -> c2 -> e
        let s = graph.insert(NodeKind::Signal);
        let c1 = computed_node(&mut graph);
        let c2 = computed_node(&mut graph);
        let e = effect_node(&mut graph);
        graph.add_dependency(s, c1, 0);
        graph.add_dependency(c1, c2, 0);
        graph.add_dependency(c2, e, 0);

        let eager = graph.invalidate(s);
        assert!(eager.is_empty());

        let flags = |graph: &Graph, id| graph.get(id).unwrap().flags;
        assert!(flags(&graph, c1).contains(Flags::OUTDATED | Flags::NOTIFIED));
        assert!(flags(&graph, c2).contains(Flags::NOTIFIED));
        assert!(!flags(&graph, c2).contains(Flags::OUTDATED));
        assert!(flags(&graph, e).contains(Flags::NOTIFIED | Flags::QUEUED));
        assert_eq!(graph.scheduler().len(), 1);
    }

    #[test]
    fn released_nodes_are_reached_again() {
        let mut graph = Graph::new(8);
        // s -> c -> e, with the refresh of e failing inside c
        let s = graph.insert(NodeKind::Signal);
        let c = computed_node(&mut graph);
        let e = effect_node(&mut graph);
        graph.add_dependency(s, c, 0);
        graph.add_dependency(c, e, 0);

        graph.invalidate(s);
        let pass = graph.scheduler_mut().take();
        assert!(graph.dequeue(pass[0]));
        graph.get_mut(c).unwrap().flags.remove(Flags::STALE);
        graph.get_mut(c).unwrap().flags.insert(Flags::OUTDATED);

        // Still notified: a second write stops at e without queueing it.
        graph.invalidate(s);
        assert!(graph.scheduler().is_empty());

        graph.release_notified([c, e]);
        graph.invalidate(s);
        assert_eq!(graph.scheduler().len(), 1);
        assert!(graph.get(e).unwrap().flags.contains(Flags::NOTIFIED));
    }

    #[test]
    fn structure_counts_removals_only() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        let c = computed_node(&mut graph);
        graph.add_dependency(s, c, 0);
        assert_eq!(graph.structure(), 0);

        graph.prepare_sources(c);
        graph.sweep_sources(c);
        assert_eq!(graph.structure(), 1);

        graph.remove(s);
        assert_eq!(graph.structure(), 2);
    }

    #[test]
    fn invalidate_diamond_enqueues_once() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        let b = computed_node(&mut graph);
        let c = computed_node(&mut graph);
        let e = effect_node(&mut graph);
        graph.add_dependency(s, b, 0);
        graph.add_dependency(s, c, 0);
        graph.add_dependency(b, e, 0);
        graph.add_dependency(c, e, 0);

        graph.invalidate(s);
        assert_eq!(graph.scheduler().len(), 1);
    }

    #[test]
    fn invalidate_returns_subscriptions() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        let sub = subscription_node(&mut graph);
        let e = effect_node(&mut graph);
        graph.add_dependency(s, sub, 0);
        graph.add_dependency(s, e, 0);

        let eager = graph.invalidate(s);
        assert_eq!(eager.as_slice(), &[sub]);
        assert_eq!(graph.scheduler().len(), 1);
    }

    #[test]
    fn invalidate_queues_in_subscription_order() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        let first = effect_node(&mut graph);
        let second = effect_node(&mut graph);
        let third = effect_node(&mut graph);
        for e in [first, second, third] {
            graph.add_dependency(s, e, 0);
        }

        graph.invalidate(s);
        let queued: Vec<_> = graph.scheduler_mut().take().into_iter().collect();
        assert_eq!(queued, vec![first, second, third]);
    }

    #[test]
    fn untracked_producer_skips_walk() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        assert!(graph.invalidate(s).is_empty());
        assert!(graph.scheduler().is_empty());
    }

    #[test]
    fn step_compares_edge_versions() {
        let mut graph = Graph::new(8);
        let s = graph.insert(NodeKind::Signal);
        let c = computed_node(&mut graph);
        let edge = graph.add_dependency(s, c, 0);

        assert_eq!(graph.step(Some(edge), 0), Step::Advance(None));

        graph.get_mut(s).unwrap().version = 1;
        assert_eq!(graph.step(Some(edge), 0), Step::Changed);
        assert_eq!(graph.step(None, 0), Step::Verified);
    }

    #[test]
    fn step_descends_into_stale_computeds() {
        let mut graph = Graph::new(8);
        let c1 = computed_node(&mut graph);
        let c2 = computed_node(&mut graph);
        let edge = graph.add_dependency(c1, c2, 0);

        // c1 has never produced a value
        assert_eq!(graph.step(Some(edge), 0), Step::Descend(c1));

        graph.get_mut(c1).unwrap().flags.insert(Flags::RUNNING);
        assert_eq!(graph.step(Some(edge), 0), Step::Cycle(c1));
    }
}
