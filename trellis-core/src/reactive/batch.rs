//! Batching and untracked scopes on the thread's default runtime.
//!
//! Both are thin wrappers over [`Runtime::batch`] and [`Runtime::untrack`];
//! use those directly when working with an explicit runtime.

use super::runtime::Runtime;

/// Run `f` with effect flushing deferred until the outermost batch ends.
///
/// Subscriptions still fire on every write inside the batch. Effects run
/// once afterwards, seeing only the final values.
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use trellis_core::{batch, Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let _effect = {
///     let (count, seen) = (count.clone(), seen.clone());
///     Effect::new(move || seen.borrow_mut().push(count.get()))
/// };
///
/// batch(|| {
///     count.set(1);
///     count.set(2);
///     count.set(3);
/// });
/// assert_eq!(*seen.borrow(), vec![0, 3]);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().batch(f)
}

/// Run `f` without recording dependencies on the current consumer.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use super::*;
    use crate::reactive::{Computed, Effect, Signal};

    #[test]
    fn batch_returns_result() {
        assert_eq!(batch(|| 7), 7);
        assert_eq!(untrack(|| "x"), "x");
    }

    #[test]
    fn nested_batches_defer_to_outermost() {
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _effect = {
            let (count, runs) = (count.clone(), runs.clone());
            Effect::new(move || {
                count.get();
                runs.set(runs.get() + 1);
            })
        };

        batch(|| {
            count.set(1);
            batch(|| count.set(2));
            assert_eq!(runs.get(), 1);
            assert!(Runtime::current().is_batching());
        });
        assert_eq!(runs.get(), 2);
        assert!(!Runtime::current().is_batching());
    }

    #[test]
    fn panicking_batch_leaves_effects_queued() {
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _effect = {
            let (count, runs) = (count.clone(), runs.clone());
            Effect::new(move || {
                count.get();
                runs.set(runs.get() + 1);
            })
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| {
                count.set(1);
                panic!("abort batch");
            })
        }));
        assert!(result.is_err());
        assert_eq!(runs.get(), 1);
        assert_eq!(Runtime::current().stats().batch_depth, 0);
        assert_eq!(Runtime::current().stats().queued, 1);

        Runtime::current().flush();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn untrack_reads_create_no_edges() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let sum = {
            let (a, b) = (a.clone(), b.clone());
            Computed::new(move || a.get() + untrack(|| b.get()))
        };

        assert_eq!(sum.get(), 3);
        assert_eq!(sum.source_count(), 1);
        assert_eq!(b.target_count(), 0);

        b.set(10);
        assert_eq!(sum.get(), 3);
        a.set(2);
        assert_eq!(sum.get(), 12);
    }
}
