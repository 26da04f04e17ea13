//! Subscriptions
//!
//! A subscription is an eager consumer of exactly one producer. Its callback
//! runs synchronously every time the producer's value changes, before the
//! write that caused the change returns, even inside a batch.
//!
//! The first run only records the edge to the producer; the callback does
//! not fire on creation. Later runs go through the same version check as
//! any other consumer, so a computed producer that recomputes to an equal
//! value does not fire the callback.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic;
use std::rc::Rc;

use tracing::trace;

use super::effect::DisposeFn;
use super::runtime::{Runtime, WeakRuntime};
use crate::error::ReactiveError;
use crate::graph::{Computation, NodeId, NodeKind};

/// Something a subscription can listen to: a signal or a computed.
pub trait Producer<T> {
    /// The producer's node.
    fn node(&self) -> NodeId;

    /// The runtime the producer lives in, if it is still alive.
    fn runtime(&self) -> Option<Runtime>;

    /// Read the value, tracking the read on the running consumer.
    fn read(&self) -> Result<T, ReactiveError>;
}

struct SubscriptionBody<T, P> {
    producer: P,
    callback: RefCell<Box<dyn FnMut(&T)>>,
    primed: Cell<bool>,
}

impl<T, P> Computation for SubscriptionBody<T, P>
where
    P: Producer<T>,
{
    fn execute(&self) -> bool {
        let value = match self.producer.read() {
            Ok(value) => value,
            Err(err) => panic::panic_any(err),
        };
        if !self.primed.replace(true) {
            return true;
        }

        // Reads inside the callback do not subscribe it to anything else.
        let mut callback = self.callback.borrow_mut();
        let callback = &mut **callback;
        match self.producer.runtime() {
            Some(runtime) => runtime.untrack(|| callback(&value)),
            None => callback(&value),
        }
        true
    }
}

/// Handle to a subscription created by [`subscribe`].
///
/// Dropping the handle leaves the subscription attached; call
/// [`dispose`](Subscription::dispose) to detach it.
#[derive(Clone)]
pub struct Subscription {
    id: NodeId,
    runtime: WeakRuntime,
}

impl Subscription {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Detach the callback. Idempotent.
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

    /// A closure that disposes of the subscription.
    pub fn disposer(&self) -> DisposeFn {
        let this = self.clone();
        Box::new(move || this.dispose())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Run `callback` synchronously with each new value of `producer`.
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use trellis_core::{batch, subscribe, Signal};
///
/// let count = Signal::new(0);
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let sink = seen.clone();
/// let _sub = subscribe(&count, move |n| sink.borrow_mut().push(*n));
///
/// batch(|| {
///     count.set(1);
///     count.set(2);
/// });
/// assert_eq!(*seen.borrow(), vec![1, 2]);
/// ```
pub fn subscribe<T, P>(producer: &P, callback: impl FnMut(&T) + 'static) -> Subscription
where
    T: 'static,
    P: Producer<T> + Clone + 'static,
{
    let runtime = producer.runtime().unwrap_or_else(Runtime::current);
    let body = Rc::new(SubscriptionBody {
        producer: producer.clone(),
        callback: RefCell::new(Box::new(callback)),
        primed: Cell::new(false),
    });
    let id = runtime.create(NodeKind::Subscription(body));
    trace!(subscription = %id, producer = %producer.node(), "subscribed");
    runtime.run_isolated(id, || runtime.execute(id));

    Subscription {
        id,
        runtime: runtime.downgrade(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, Signal};

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(&T) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: &T| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn does_not_fire_on_creation() {
        let rt = Runtime::new();
        let signal = Signal::new_in(&rt, 1);
        let (seen, cb) = recorder::<i32>();
        let sub = signal.subscribe(cb);

        assert!(seen.borrow().is_empty());
        assert_eq!(signal.target_count(), 1);
        assert!(!sub.is_disposed());
    }

    #[test]
    fn fires_on_each_change() {
        let rt = Runtime::new();
        let signal = Signal::new_in(&rt, 1);
        let (seen, cb) = recorder::<i32>();
        let _sub = signal.subscribe(cb);

        signal.set(2);
        signal.set(2);
        signal.set(3);
        assert_eq!(*seen.borrow(), vec![2, 3]);
    }

    #[test]
    fn computed_producer_short_circuits() {
        let rt = Runtime::new();
        let signal = Signal::new_in(&rt, 2i32);
        let abs = {
            let signal = signal.clone();
            Computed::new_in(&rt, move || signal.get().abs())
        };
        let (seen, cb) = recorder::<i32>();
        let _sub = abs.subscribe(cb);

        signal.set(-2);
        assert!(seen.borrow().is_empty());
        signal.set(-5);
        assert_eq!(*seen.borrow(), vec![5]);
    }

    #[test]
    fn callback_reads_are_untracked() {
        let rt = Runtime::new();
        let a = Signal::new_in(&rt, 1);
        let b = Signal::new_in(&rt, 10);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _sub = {
            let b = b.clone();
            let seen = seen.clone();
            a.subscribe(move |n| seen.borrow_mut().push(n + b.get()))
        };

        a.set(2);
        assert_eq!(*seen.borrow(), vec![12]);
        assert_eq!(b.target_count(), 0);

        b.set(20);
        assert_eq!(*seen.borrow(), vec![12]);
    }

    #[test]
    fn dispose_detaches() {
        let rt = Runtime::new();
        let signal = Signal::new_in(&rt, 1);
        let (seen, cb) = recorder::<i32>();
        let sub = signal.subscribe(cb);

        let dispose = sub.disposer();
        dispose();
        dispose();
        assert!(sub.is_disposed());
        assert_eq!(signal.target_count(), 0);

        signal.set(5);
        assert!(seen.borrow().is_empty());
    }
}
