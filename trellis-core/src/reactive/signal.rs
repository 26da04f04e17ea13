//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! records which consumers read it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read inside a running computed, effect or
//!    subscription, the runtime links an edge from the signal to that
//!    consumer, stamped with the signal's version.
//!
//! 2. When a signal is written with a value that differs from the current
//!    one, its version is bumped and every consumer downstream is marked.
//!
//! 3. Effects are queued and run when the outermost batch ends;
//!    subscriptions run before the write returns.
//!
//! # Memory Layout
//!
//! The value lives in the handle (`Rc<RefCell<T>>`), shared by clones. The
//! graph node carries only flags, a version and the edge list heads.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{Producer, Subscription};
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};

/// A reactive signal holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use trellis_core::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
///
/// count.update(|n| *n += 1);
/// assert_eq!(count.get_untracked(), 6);
/// ```
pub struct Signal<T: 'static> {
    id: NodeId,
    runtime: WeakRuntime,
    value: Rc<RefCell<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a signal in the thread's default runtime.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current(), value)
    }

    pub fn new_in(runtime: &Runtime, value: T) -> Self {
        let id = runtime.create(NodeKind::Signal);
        Self {
            id,
            runtime: runtime.downgrade(),
            value: Rc::new(RefCell::new(value)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Record a read against the running consumer.
    fn track(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track(self.id);
        }
    }

    /// Borrow the value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.value.borrow())
    }

    /// Borrow the value without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Replace the value through a closure and notify dependents.
    ///
    /// Always counts as a change; there is no old value to compare against.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if let Err(err) = self.try_update(f) {
            std::panic::panic_any(err);
        }
    }

    pub fn try_update(&self, f: impl FnOnce(&mut T)) -> Result<(), ReactiveError> {
        let runtime = self.runtime.upgrade();
        if let Some(runtime) = &runtime {
            runtime.check_write(self.id)?;
        }
        f(&mut self.value.borrow_mut());
        if let Some(runtime) = runtime {
            runtime.write(self.id);
        }
        Ok(())
    }

    /// Dispose of the signal. Later writes store the value but notify no one.
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

    /// Number of consumers currently reading this signal.
    pub fn target_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.target_count(self.id))
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without creating a dependency.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }

    /// Run `callback` with every new value, synchronously on each change.
    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        super::subscriber::subscribe(self, callback)
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Set a new value and notify dependents if it differs.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError::WriteInComputed`] payload when called
    /// while a computed is evaluating.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            std::panic::panic_any(err);
        }
    }

    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        let runtime = self.runtime.upgrade();
        if let Some(runtime) = &runtime {
            runtime.check_write(self.id)?;
        }
        if *self.value.borrow() == value {
            return Ok(());
        }
        let old = self.value.replace(value);
        drop(old);
        if let Some(runtime) = runtime {
            runtime.write(self.id);
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Producer<T> for Signal<T> {
    fn node(&self) -> NodeId {
        self.id
    }

    fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    fn read(&self) -> Result<T, ReactiveError> {
        Ok(self.get())
    }
}

/// Create a signal in the thread's default runtime.
pub fn signal<T: 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

impl Runtime {
    /// Create a signal in this runtime.
    pub fn signal<T: 'static>(&self, value: T) -> Signal<T> {
        Signal::new_in(self, value)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: self.runtime.clone(),
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Signal");
        s.field("id", &self.id);
        match self.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
