//! Edge Pool
//!
//! Dependency edges churn constantly: every recomputation that changes its
//! control flow drops some edges and links others. The pool keeps released
//! edge records around so the hot read/write paths reuse allocations instead
//! of hitting the allocator. It is purely a performance device and has no
//! failure modes.

use super::edge::Edge;

/// Default number of idle edges kept for reuse.
pub const DEFAULT_MAX_POOL_SIZE: usize = 1000;

/// Free list of zeroed edge records, bounded by `max_size`.
#[derive(Debug)]
pub(crate) struct EdgePool {
    idle: Vec<Box<Edge>>,
    max_size: usize,
}

impl EdgePool {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            idle: Vec::new(),
            max_size,
        }
    }

    /// Hand out a zeroed edge, preferring a pooled one.
    pub(crate) fn acquire(&mut self) -> Box<Edge> {
        self.idle.pop().unwrap_or_default()
    }

    /// Take an edge back.
    ///
    /// The caller must have unlinked it from both lists. Once the pool is full
    /// the record is dropped and its memory goes back to the allocator.
    pub(crate) fn release(&mut self, mut edge: Box<Edge>) {
        if self.idle.len() >= self.max_size {
            return;
        }
        *edge = Edge::default();
        self.idle.push(edge);
    }

    /// Number of idle edges currently held.
    pub(crate) fn len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
