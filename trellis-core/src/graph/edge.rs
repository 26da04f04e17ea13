//! Dependency Edges
//!
//! An edge records that one consumer read one producer. Each edge sits in two
//! intrusive doubly-linked lists at once: the producer's target list and the
//! consumer's source list. Edges are addressed by stable integer handles into
//! an arena, so the mutual references between producers and consumers never
//! form ownership cycles.
//!
//! New edges are linked at the head of both lists. Consumers also keep a tail
//! pointer so verification can walk sources in first-read order.

use std::ops::{Index, IndexMut};

use tracing::trace;

use super::node::{Flags, NodeId};
use super::pool::EdgePool;
use super::Graph;

/// Handle to a live edge in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EdgeId(u32);

/// One producer→consumer dependency.
#[derive(Debug, Clone, Default)]
pub(crate) struct Edge {
    pub(crate) source: NodeId,
    pub(crate) target: NodeId,

    /// Producer version as of the consumer's last use of it.
    /// `None` marks the edge unconfirmed during a re-run.
    pub(crate) version: Option<u64>,

    pub(crate) prev_source: Option<EdgeId>,
    pub(crate) next_source: Option<EdgeId>,
    pub(crate) prev_target: Option<EdgeId>,
    pub(crate) next_target: Option<EdgeId>,
}

/// Slot storage for live edges, fed by the [`EdgePool`].
#[derive(Debug)]
pub(crate) struct EdgeArena {
    slots: Vec<Option<Box<Edge>>>,
    vacant: Vec<u32>,
    pool: EdgePool,
    live: usize,
}

impl EdgeArena {
    pub(crate) fn new(max_pool_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            pool: EdgePool::new(max_pool_size),
            live: 0,
        }
    }

    fn alloc(&mut self, source: NodeId, target: NodeId, version: u64) -> EdgeId {
        let mut edge = self.pool.acquire();
        edge.source = source;
        edge.target = target;
        edge.version = Some(version);

        self.live += 1;
        match self.vacant.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(edge);
                EdgeId(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(edge));
                EdgeId(index)
            }
        }
    }

    fn free(&mut self, id: EdgeId) {
        if let Some(edge) = self.slots.get_mut(id.0 as usize).and_then(Option::take) {
            self.vacant.push(id.0);
            self.pool.release(edge);
            self.live -= 1;
        }
    }

    pub(crate) fn get(&self, id: EdgeId) -> Option<&Edge> {
        self.slots.get(id.0 as usize).and_then(|slot| slot.as_deref())
    }

    pub(crate) fn get_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.slots.get_mut(id.0 as usize).and_then(|slot| slot.as_deref_mut())
    }

    /// Number of live edges.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn pool(&self) -> &EdgePool {
        &self.pool
    }
}

impl Index<EdgeId> for EdgeArena {
    type Output = Edge;

    fn index(&self, id: EdgeId) -> &Edge {
        match self.get(id) {
            Some(edge) => edge,
            None => panic!("edge {id:?} is not live"),
        }
    }
}

impl IndexMut<EdgeId> for EdgeArena {
    fn index_mut(&mut self, id: EdgeId) -> &mut Edge {
        match self.get_mut(id) {
            Some(edge) => edge,
            None => panic!("edge {id:?} is not live"),
        }
    }
}

impl Graph {
    /// Create an edge and link it at the head of both lists.
    pub(crate) fn link_nodes(&mut self, source: NodeId, target: NodeId, version: u64) -> EdgeId {
        let source_head = self.node(source).targets;
        let target_head = self.node(target).sources;

        let id = self.edges.alloc(source, target, version);
        {
            let edge = &mut self.edges[id];
            edge.next_target = source_head;
            edge.next_source = target_head;
        }
        if let Some(head) = source_head {
            self.edges[head].prev_target = Some(id);
        }
        if let Some(head) = target_head {
            self.edges[head].prev_source = Some(id);
        }

        let producer = self.node_mut(source);
        producer.targets = Some(id);
        producer.last_edge = Some(id);
        producer.flags.insert(Flags::TRACKING);

        let consumer = self.node_mut(target);
        consumer.sources = Some(id);
        if consumer.sources_tail.is_none() {
            consumer.sources_tail = Some(id);
        }

        trace!(%source, %target, version, "linked edge");
        id
    }

    /// Splice an edge out of its producer's target list.
    pub(crate) fn remove_from_targets(&mut self, id: EdgeId) {
        let (source, prev, next) = {
            let edge = &self.edges[id];
            (edge.source, edge.prev_target, edge.next_target)
        };

        if let Some(prev) = prev {
            self.edges[prev].next_target = next;
        }
        if let Some(next) = next {
            self.edges[next].prev_target = prev;
        }
        if let Some(producer) = self.get_mut(source) {
            if prev.is_none() {
                producer.targets = next;
            }
            if producer.last_edge == Some(id) {
                producer.last_edge = None;
            }
            if producer.targets.is_none() {
                producer.flags.remove(Flags::TRACKING);
            }
        }

        let edge = &mut self.edges[id];
        edge.prev_target = None;
        edge.next_target = None;
    }

    /// Splice an edge out of its consumer's source list.
    pub(crate) fn remove_from_sources(&mut self, id: EdgeId) {
        let (target, prev, next) = {
            let edge = &self.edges[id];
            (edge.target, edge.prev_source, edge.next_source)
        };

        if let Some(prev) = prev {
            self.edges[prev].next_source = next;
        }
        if let Some(next) = next {
            self.edges[next].prev_source = prev;
        }
        if let Some(consumer) = self.get_mut(target) {
            if prev.is_none() {
                consumer.sources = next;
            }
            if next.is_none() {
                consumer.sources_tail = prev;
            }
        }

        let edge = &mut self.edges[id];
        edge.prev_source = None;
        edge.next_source = None;
    }

    /// Unlink an edge from both lists and hand it back to the pool.
    pub(crate) fn drop_edge(&mut self, id: EdgeId) {
        trace!(
            source = %self.edges[id].source,
            target = %self.edges[id].target,
            "dropped edge"
        );
        self.remove_from_targets(id);
        self.remove_from_sources(id);
        self.edges.free(id);
        self.structure += 1;
    }

    /// Record that `target` read `source` at `version`.
    ///
    /// Tries the producer's cached last edge, then a scan of the consumer's
    /// sources, and only then links a new edge. A consumer re-reading a stable
    /// set of producers therefore never allocates.
    pub(crate) fn add_dependency(&mut self, source: NodeId, target: NodeId, version: u64) -> EdgeId {
        if let Some(last) = self.node(source).last_edge {
            let edge = &mut self.edges[last];
            if edge.target == target {
                edge.version = Some(version);
                return last;
            }
        }

        let mut cursor = self.node(target).sources;
        while let Some(id) = cursor {
            let edge = &mut self.edges[id];
            if edge.source == source {
                edge.version = Some(version);
                self.node_mut(source).last_edge = Some(id);
                return id;
            }
            cursor = edge.next_source;
        }

        self.link_nodes(source, target, version)
    }

    /// Stamp an edge with its producer's current version after the producer
    /// was refreshed. Ignores edges that were recycled in the meantime.
    pub(crate) fn confirm_edge(&mut self, id: EdgeId, source: NodeId) {
        let Some(version) = self.get(source).map(|node| node.version) else {
            return;
        };
        if let Some(edge) = self.edges.get_mut(id).filter(|edge| edge.source == source) {
            edge.version = Some(version);
        }
    }

    /// Mark every source edge of `consumer` unconfirmed ahead of a re-run.
    pub(crate) fn prepare_sources(&mut self, consumer: NodeId) {
        let mut cursor = self.get(consumer).and_then(|node| node.sources);
        while let Some(id) = cursor {
            let edge = &mut self.edges[id];
            edge.version = None;
            cursor = edge.next_source;
        }
    }

    /// Drop every source edge the last run did not confirm.
    ///
    /// Returns the number of edges removed.
    pub(crate) fn sweep_sources(&mut self, consumer: NodeId) -> usize {
        let mut removed = 0;
        let mut cursor = self.get(consumer).and_then(|node| node.sources);
        while let Some(id) = cursor {
            let (next, stale) = {
                let edge = &self.edges[id];
                (edge.next_source, edge.version.is_none())
            };
            if stale {
                self.drop_edge(id);
                removed += 1;
            }
            cursor = next;
        }
        removed
    }

    /// Drop every edge where `consumer` is the reader.
    pub(crate) fn unlink_sources(&mut self, consumer: NodeId) {
        while let Some(id) = self.get(consumer).and_then(|node| node.sources) {
            self.drop_edge(id);
        }
    }

    /// Drop every edge where `producer` is the one being read.
    pub(crate) fn unlink_targets(&mut self, producer: NodeId) {
        while let Some(id) = self.get(producer).and_then(|node| node.targets) {
            self.drop_edge(id);
        }
    }

    /// Whether `id` is a live edge in the source list of `consumer`.
    pub(crate) fn edge_feeds(&self, id: EdgeId, consumer: NodeId) -> bool {
        self.edges.get(id).is_some_and(|edge| edge.target == consumer)
    }

    pub(crate) fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub(crate) fn source_count(&self, consumer: NodeId) -> usize {
        let mut count = 0;
        let mut cursor = self.get(consumer).and_then(|node| node.sources);
        while let Some(id) = cursor {
            count += 1;
            cursor = self.edges[id].next_source;
        }
        count
    }

    pub(crate) fn target_count(&self, producer: NodeId) -> usize {
        let mut count = 0;
        let mut cursor = self.get(producer).and_then(|node| node.targets);
        while let Some(id) = cursor {
            count += 1;
            cursor = self.edges[id].next_target;
        }
        count
    }

    /// Targets of `producer` in list order (most recently linked first).
    pub(crate) fn targets_of(&self, producer: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.get(producer).and_then(|node| node.targets);
        std::iter::from_fn(move || {
            let id = cursor?;
            let edge = &self.edges[id];
            cursor = edge.next_target;
            Some(edge.target)
        })
    }

    /// Sources of `consumer` in list order (most recently linked first).
    #[cfg(test)]
    pub(crate) fn sources_of(&self, consumer: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.get(consumer).and_then(|node| node.sources);
        std::iter::from_fn(move || {
            let id = cursor?;
            let edge = &self.edges[id];
            cursor = edge.next_source;
            Some(edge.source)
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
