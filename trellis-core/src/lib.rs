//! Trellis Core
//!
//! This crate provides a fine-grained reactive dependency graph engine.
//! It implements:
//!
//! - Reactive primitives (signals, computeds, effects, subscriptions)
//! - Push-pull propagation with per-edge version checks
//! - A FIFO effect scheduler with batching and untracked scopes
//! - Cycle detection on an iterative refresh walk
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: user-facing primitives and the runtime that drives them
//! - `graph`: node and edge arenas, the edge pool and the scheduler queue
//! - `config`: runtime tunables, loadable from JSON
//! - `error`: error types
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::{Computed, Effect, Signal};
//!
//! let count = Signal::new(0);
//!
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(move || count.get() * 2)
//! };
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = {
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     Effect::new(move || {
//!         log.borrow_mut().push(format!("Count: {}, Doubled: {}", count.get(), doubled.get()));
//!     })
//! };
//!
//! count.set(5);
//! assert_eq!(log.borrow().last().unwrap(), "Count: 5, Doubled: 10");
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{RuntimeConfig, DEFAULT_MAX_FLUSH_PASSES};
pub use error::{ConfigError, ReactiveError};
pub use graph::{NodeId, DEFAULT_MAX_POOL_SIZE};
pub use reactive::{
    batch, computed, effect, signal, subscribe, untrack, Computed, DisposeFn, Effect, GraphStats,
    Producer, Runtime, Signal, Subscription,
};
