//! Error types for the reactive runtime.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised while reading, writing or flushing the reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A node was reached again while it was still executing.
    ///
    /// `path` lists the nodes being refreshed when the cycle closed, outermost
    /// first, ending with the node that was re-entered.
    #[error("cycle detected at {node} (path: {})", format_path(.path))]
    Cycle { node: NodeId, path: Vec<NodeId> },

    /// A disposed computed was read before it ever produced a value.
    #[error("computed {node} was disposed before producing a value")]
    Disposed { node: NodeId },

    /// A signal was written while a computed was evaluating.
    #[error("signal {signal} written while computed {computed} was evaluating")]
    WriteInComputed { signal: NodeId, computed: NodeId },

    /// The scheduler kept re-filling its queue: effects are re-triggering
    /// each other without settling.
    #[error("effect flush did not settle after {passes} passes")]
    FlushLimit { passes: usize },

    /// An effect or subscription callback panicked.
    #[error("callback of {node} panicked: {message}")]
    CallbackPanicked { node: NodeId, message: String },
}

impl ReactiveError {
    /// The node the error is attributed to, when there is one.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ReactiveError::Cycle { node, .. }
            | ReactiveError::Disposed { node }
            | ReactiveError::CallbackPanicked { node, .. } => Some(*node),
            ReactiveError::WriteInComputed { signal, .. } => Some(*signal),
            ReactiveError::FlushLimit { .. } => None,
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, ReactiveError::Cycle { .. })
    }
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised while loading a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid runtime config: {0}")]
    Invalid(&'static str),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
