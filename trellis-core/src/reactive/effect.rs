//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! sources change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately to record its sources.
//!
//! 2. When a source is invalidated, the effect is queued. The queue is
//!    drained after the write, or when the outermost batch ends.
//!
//! 3. Before re-running, a queued effect checks its sources. If every one of
//!    them settled on the value it saw last time, the run is skipped.
//!
//! 4. Each run re-records the sources; producers no longer read lose their
//!    edge to the effect.
//!
//! # Cleanup
//!
//! An effect created with [`Effect::with_cleanup`] returns a cleanup closure
//! from each run. It is called before the next run and when the effect is
//! disposed.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (refresh on read); effects are scheduled.
//! - Effect bodies run inside an implicit batch, so their writes are flushed
//!   by the drain loop that is already running rather than recursively.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{Computation, NodeId, NodeKind};

/// A closure that disposes of the primitive it was taken from.
pub type DisposeFn = Box<dyn Fn()>;

type Cleanup = Box<dyn FnOnce()>;

type Body = Box<dyn FnMut() -> Option<Cleanup>>;

struct EffectBody {
    run: RefCell<Body>,
    cleanup: RefCell<Option<Cleanup>>,
    runs: Rc<Cell<usize>>,
}

impl Computation for EffectBody {
    fn execute(&self) -> bool {
        let next = {
            let mut run = self.run.borrow_mut();
            let run = &mut **run;
            run()
        };
        self.runs.set(self.runs.get() + 1);
        *self.cleanup.borrow_mut() = next;
        true
    }

    fn cleanup(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// A side-effecting computation that runs when its sources change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let effect = {
///     let (count, seen) = (count.clone(), seen.clone());
///     Effect::new(move || seen.set(count.get()))
/// };
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    id: NodeId,
    runtime: WeakRuntime,
    runs: Rc<Cell<usize>>,
}

impl Effect {
    /// Create an effect in the thread's default runtime and run it once.
    pub fn new(mut run: impl FnMut() + 'static) -> Self {
        Self::spawn(
            &Runtime::current(),
            Box::new(move || {
                run();
                None
            }),
        )
    }

    pub fn new_in(runtime: &Runtime, mut run: impl FnMut() + 'static) -> Self {
        Self::spawn(
            runtime,
            Box::new(move || {
                run();
                None
            }),
        )
    }

    /// Create an effect whose runs return a cleanup closure.
    pub fn with_cleanup<F, C>(run: F) -> Self
    where
        F: FnMut() -> C + 'static,
        C: FnOnce() + 'static,
    {
        Self::with_cleanup_in(&Runtime::current(), run)
    }

    pub fn with_cleanup_in<F, C>(runtime: &Runtime, mut run: F) -> Self
    where
        F: FnMut() -> C + 'static,
        C: FnOnce() + 'static,
    {
        Self::spawn(
            runtime,
            Box::new(move || Some(Box::new(run()) as Cleanup)),
        )
    }

    /// Register the effect and run it for the first time.
    ///
    /// A panic in the first run is reported like any later one; the effect
    /// stays registered with whatever sources it read before failing.
    fn spawn(runtime: &Runtime, run: Body) -> Self {
        let runs = Rc::new(Cell::new(0));
        let body = Rc::new(EffectBody {
            run: RefCell::new(run),
            cleanup: RefCell::new(None),
            runs: Rc::clone(&runs),
        });
        let id = runtime.create(NodeKind::Effect(body));
        runtime.run_isolated(id, || runtime.execute(id));
        runtime.flush();

        Self {
            id,
            runtime: runtime.downgrade(),
            runs,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Stop the effect and run its pending cleanup. Idempotent.
    ///
    /// Safe to call from inside the effect itself; teardown then happens
    /// when the current run ends.
    pub fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        !self
            .runtime
            .upgrade()
            .is_some_and(|runtime| runtime.is_live(self.id))
    }

    /// A closure that disposes of the effect.
    pub fn disposer(&self) -> DisposeFn {
        let this = self.clone();
        Box::new(move || this.dispose())
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.runs.get()
    }

    /// Number of producers read by the last run.
    pub fn source_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.source_count(self.id))
    }
}

/// Create an effect in the thread's default runtime and run it once.
pub fn effect(run: impl FnMut() + 'static) -> Effect {
    Effect::new(run)
}

impl Runtime {
    /// Create an effect in this runtime and run it once.
    pub fn effect(&self, run: impl FnMut() + 'static) -> Effect {
        Effect::new_in(self, run)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
