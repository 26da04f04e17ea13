//! Reactive Primitives
//!
//! This module implements the user-facing side of the engine: signals,
//! computeds, effects and subscriptions, plus the runtime that drives them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Reading it inside a running
//! consumer records a dependency; writing a different value marks every
//! consumer downstream.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! lazily, only when read after one of its sources actually changed.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs after its sources
//! change. Effects are queued and run in FIFO order once the current write or
//! batch completes.
//!
//! ## Subscriptions
//!
//! A Subscription attaches a callback to a single producer and runs it
//! synchronously on every change, before the write returns.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: the runtime's context knows which
//! consumer is executing, and every read made while it runs links an edge
//! to it. Handles are cheap to clone and hold only a weak reference to their
//! runtime.

mod batch;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;

pub use batch::{batch, untrack};
pub use computed::{computed, Computed};
pub use effect::{effect, DisposeFn, Effect};
pub use runtime::{GraphStats, Runtime};
pub use signal::{signal, Signal};
pub use subscriber::{subscribe, Producer, Subscription};
