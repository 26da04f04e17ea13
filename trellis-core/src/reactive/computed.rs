//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! sources change.
//!
//! # How Computeds Work
//!
//! 1. On first read, the computed runs its function and caches the result.
//!
//! 2. A write upstream marks it: `OUTDATED` when a direct source changed,
//!    `NOTIFIED` when something further up did.
//!
//! 3. On the next read a notified computed checks its sources in the order
//!    it first read them. If every recorded version still matches, it adopts
//!    the current global version without recomputing.
//!
//! 4. Otherwise it recomputes. Its own version only moves when the new value
//!    differs from the cached one, so consumers of a computed that settles on
//!    the same value stay put.
//!
//! # Errors
//!
//! [`Computed::try_get`] returns cycle and disposal errors. [`Computed::get`]
//! raises them as a panic payload instead, which unwinds through any
//! enclosing computation and comes back out as an `Err` at the outermost
//! `try_get`.

use std::cell::RefCell;
use std::fmt;
use std::panic;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{Producer, Subscription};
use crate::error::ReactiveError;
use crate::graph::{Computation, Flags, NodeId, NodeKind};

struct ComputedBody<T, F> {
    compute: F,
    slot: Rc<RefCell<Option<T>>>,
}

impl<T, F> Computation for ComputedBody<T, F>
where
    T: PartialEq,
    F: Fn() -> T,
{
    fn execute(&self) -> bool {
        let value = (self.compute)();
        let changed = self.slot.borrow().as_ref() != Some(&value);
        if changed {
            let old = self.slot.replace(Some(value));
            drop(old);
        }
        changed
    }
}

/// A lazily evaluated, memoized derivation.
///
/// # Example
///
/// ```rust
/// use trellis_core::{Computed, Signal};
///
/// let width = Signal::new(3);
/// let height = Signal::new(4);
/// let area = {
///     let (width, height) = (width.clone(), height.clone());
///     Computed::new(move || width.get() * height.get())
/// };
///
/// assert_eq!(area.get(), 12);
/// width.set(5);
/// assert_eq!(area.get(), 20);
/// ```
pub struct Computed<T: 'static> {
    id: NodeId,
    runtime: WeakRuntime,
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a computed in the thread's default runtime.
    ///
    /// The function does not run until the first read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::new_in(&Runtime::current(), compute)
    }

    pub fn new_in(runtime: &Runtime, compute: impl Fn() -> T + 'static) -> Self {
        let slot = Rc::new(RefCell::new(None));
        let body = Rc::new(ComputedBody {
            compute,
            slot: Rc::clone(&slot),
        });
        let id = runtime.create(NodeKind::Computed(body));
        Self {
            id,
            runtime: runtime.downgrade(),
            slot,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics with the [`ReactiveError`] as payload where
    /// [`try_get`](Self::try_get) would return it.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic::panic_any(err),
        }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// A disposed computed returns its last value without tracking.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let Some(runtime) = self.runtime.upgrade() else {
            return self.cached();
        };
        match runtime.flags(self.id) {
            None => return self.cached(),
            Some(flags) if flags.contains(Flags::DISPOSED) => return self.cached(),
            Some(flags) if flags.contains(Flags::RUNNING) => {
                return Err(runtime.reentry(self.id));
            }
            Some(_) => {}
        }

        let edge = runtime.track(self.id);
        runtime.refresh(self.id)?;
        if let Some(edge) = edge {
            runtime.confirm(edge, self.id);
        }
        self.cached()
    }

    /// Get the current value without creating a dependency.
    pub fn get_untracked(&self) -> T {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic::panic_any(err),
        }
    }

    pub fn try_get_untracked(&self) -> Result<T, ReactiveError> {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.untrack(|| self.try_get()),
            None => self.cached(),
        }
    }

    fn cached(&self) -> Result<T, ReactiveError> {
        self.slot
            .borrow()
            .clone()
            .ok_or(ReactiveError::Disposed { node: self.id })
    }

    /// Run `callback` with every new value, synchronously on each change.
    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        super::subscriber::subscribe(self, callback)
    }
}

impl<T: 'static> Computed<T> {
    /// Dispose of the computed. Idempotent.
    ///
    /// Its sources forget it; reads keep returning the last value.
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

    /// Number of producers read by the last evaluation.
    pub fn source_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.source_count(self.id))
    }

    /// Number of consumers currently reading this computed.
    pub fn target_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.target_count(self.id))
    }

    pub fn has_value(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl<T> Producer<T> for Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    fn node(&self) -> NodeId {
        self.id
    }

    fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    fn read(&self) -> Result<T, ReactiveError> {
        self.try_get()
    }
}

/// Create a computed in the thread's default runtime.
pub fn computed<T>(compute: impl Fn() -> T + 'static) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    Computed::new(compute)
}

impl Runtime {
    /// Create a computed in this runtime.
    pub fn computed<T>(&self, compute: impl Fn() -> T + 'static) -> Computed<T>
    where
        T: Clone + PartialEq + 'static,
    {
        Computed::new_in(self, compute)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: self.runtime.clone(),
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Computed");
        s.field("id", &self.id);
        match self.slot.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
