//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//!
//! Every participant (signal, computed, effect, subscription) shares one record
//! layout: a kind tag, a status bitfield, a producer version and the heads of
//! its two edge lists. Fields that do not apply to a kind stay empty (a signal
//! never has sources, an effect never has targets).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;

use super::edge::EdgeId;

/// Unique identifier for a node in the dependency graph.
///
/// The index addresses a slot in the node arena; the generation is bumped every
/// time the slot is vacated, so an id held by a handle after its node was
/// disposed never aliases a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Placeholder carried by zeroed edge records.
    pub(crate) const DANGLING: NodeId = NodeId {
        index: u32::MAX,
        generation: 0,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the arena slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the slot generation this id was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::DANGLING
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}v{}", self.index, self.generation)
    }
}

/// Status bits shared by every node kind.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);

    /// The node's body is executing right now.
    pub const RUNNING: Flags = Flags(1 << 0);

    /// Terminal state; the node no longer tracks or reacts.
    pub const DISPOSED: Flags = Flags(1 << 1);

    /// A direct source changed; the node must re-run.
    pub const OUTDATED: Flags = Flags(1 << 2);

    /// Some transitive source may have changed; versions must be checked.
    pub const NOTIFIED: Flags = Flags(1 << 3);

    /// The node has at least one target (someone depends on it).
    pub const TRACKING: Flags = Flags(1 << 4);

    /// The node sits in the scheduler queue.
    pub const QUEUED: Flags = Flags(1 << 5);

    /// Mask of the invalidation bits.
    pub const STALE: Flags = Flags(Self::OUTDATED.0 | Self::NOTIFIED.0);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 6] = [
            (Flags::RUNNING, "RUNNING"),
            (Flags::DISPOSED, "DISPOSED"),
            (Flags::OUTDATED, "OUTDATED"),
            (Flags::NOTIFIED, "NOTIFIED"),
            (Flags::TRACKING, "TRACKING"),
            (Flags::QUEUED, "QUEUED"),
        ];

        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// The executable part of a consumer node.
///
/// The graph only stores these; the runtime clones the `Rc` out and invokes it
/// with no graph borrow held, since bodies run arbitrary user code.
pub(crate) trait Computation {
    /// Run the body with tracking already pointed at this node.
    ///
    /// Returns whether the node's output changed. Only computeds use the
    /// answer; effects and subscriptions always report `true`.
    fn execute(&self) -> bool;

    /// Release resources held from the previous run (effect cleanups).
    fn cleanup(&self) {}
}

/// The kind of node in the dependency graph, carrying its body.
pub(crate) enum NodeKind {
    /// A mutable leaf producer. Its value lives in the typed handle.
    Signal,

    /// A memoized derivation: both producer and consumer.
    Computed(Rc<dyn Computation>),

    /// A deferred side effect, run from the scheduler.
    Effect(Rc<dyn Computation>),

    /// An eager listener attached to a single producer.
    Subscription(Rc<dyn Computation>),
}

impl NodeKind {
    pub(crate) fn body(&self) -> Option<&Rc<dyn Computation>> {
        match self {
            NodeKind::Signal => None,
            NodeKind::Computed(body) | NodeKind::Effect(body) | NodeKind::Subscription(body) => {
                Some(body)
            }
        }
    }

    pub(crate) fn is_computed(&self) -> bool {
        matches!(self, NodeKind::Computed(_))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            NodeKind::Signal => "signal",
            NodeKind::Computed(_) => "computed",
            NodeKind::Effect(_) => "effect",
            NodeKind::Subscription(_) => "subscription",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a refresh walk has to do with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// Cached state is valid.
    Fresh,

    /// A transitive source may have changed; compare per-edge versions.
    Check,

    /// Must re-run.
    Dirty,

    /// Currently executing; reaching it again is a cycle.
    Running,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) flags: Flags,

    /// Producer version, bumped whenever the produced value changes.
    /// Zero on a computed means it has never produced a value.
    pub(crate) version: u64,

    /// Global version at which a computed was last confirmed fresh.
    pub(crate) global_version: u64,

    /// Head of the consumer-side list (producers this node reads).
    pub(crate) sources: Option<EdgeId>,

    /// Tail of the consumer-side list; verification walks from here so
    /// sources are checked in the order they were first read.
    pub(crate) sources_tail: Option<EdgeId>,

    /// Head of the producer-side list (consumers reading this node).
    pub(crate) targets: Option<EdgeId>,

    /// Most recently created or confirmed edge out of this producer.
    pub(crate) last_edge: Option<EdgeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            flags: Flags::NONE,
            version: 0,
            global_version: 0,
            sources: None,
            sources_tail: None,
            targets: None,
            last_edge: None,
        }
    }

    /// Classify the node for a refresh walk at the given global version.
    pub(crate) fn status(&self, global_version: u64) -> Status {
        if self.flags.contains(Flags::DISPOSED) {
            return Status::Fresh;
        }
        if self.flags.contains(Flags::RUNNING) {
            return Status::Running;
        }

        match self.kind {
            NodeKind::Signal => Status::Fresh,
            NodeKind::Computed(_) => {
                if self.version == 0 || self.flags.contains(Flags::OUTDATED) {
                    Status::Dirty
                } else if self.flags.contains(Flags::NOTIFIED)
                    || self.global_version != global_version
                {
                    Status::Check
                } else {
                    Status::Fresh
                }
            }
            NodeKind::Effect(_) | NodeKind::Subscription(_) => {
                if self.flags.contains(Flags::OUTDATED) {
                    Status::Dirty
                } else if self.flags.contains(Flags::NOTIFIED) {
                    Status::Check
                } else {
                    Status::Fresh
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Computation for Noop {
        fn execute(&self) -> bool {
            true
        }
    }

    #[test]
    fn flags_are_distinct() {
        let all = [
            Flags::RUNNING,
            Flags::DISPOSED,
            Flags::OUTDATED,
            Flags::NOTIFIED,
            Flags::TRACKING,
            Flags::QUEUED,
        ];

        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert!(!a.intersects(*b), "{a:?} overlaps {b:?}");
                }
            }
        }
    }

    #[test]
    fn flag_insert_and_remove() {
        let mut flags = Flags::NONE;
        flags.insert(Flags::OUTDATED | Flags::NOTIFIED);
        assert!(flags.contains(Flags::STALE));

        flags.remove(Flags::OUTDATED);
        assert!(flags.contains(Flags::NOTIFIED));
        assert!(!flags.contains(Flags::OUTDATED));
        assert!(flags.intersects(Flags::STALE));
    }

    #[test]
    fn computed_starts_dirty() {
        let node = Node::new(NodeKind::Computed(Rc::new(Noop)));
        assert_eq!(node.status(0), Status::Dirty);
    }

    #[test]
    fn status_transitions() {
        let mut node = Node::new(NodeKind::Computed(Rc::new(Noop)));
        node.version = 1;
        node.global_version = 7;
        assert_eq!(node.status(7), Status::Fresh);

        // Unrelated write elsewhere in the graph
        assert_eq!(node.status(8), Status::Check);

        node.global_version = 8;
        node.flags.insert(Flags::NOTIFIED);
        assert_eq!(node.status(8), Status::Check);

        node.flags.insert(Flags::OUTDATED);
        assert_eq!(node.status(8), Status::Dirty);

        node.flags.insert(Flags::RUNNING);
        assert_eq!(node.status(8), Status::Running);
    }

    #[test]
    fn signals_and_disposed_nodes_are_fresh() {
        let mut signal = Node::new(NodeKind::Signal);
        signal.flags.insert(Flags::OUTDATED);
        assert_eq!(signal.status(3), Status::Fresh);

        let mut effect = Node::new(NodeKind::Effect(Rc::new(Noop)));
        effect.flags.insert(Flags::OUTDATED | Flags::DISPOSED);
        assert_eq!(effect.status(3), Status::Fresh);
    }

    #[test]
    fn node_ids_display() {
        let id = NodeId::new(4, 2);
        assert_eq!(id.to_string(), "n4v2");
        assert_ne!(id, NodeId::new(4, 3));
    }
}
