//! Scheduler, Error and Resource Tests
//!
//! These tests cover effect ordering, flush limits, error isolation and the
//! edge pool bounds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::{
    batch, Computed, Effect, ReactiveError, Runtime, RuntimeConfig, Signal,
    DEFAULT_MAX_FLUSH_PASSES,
};

/// Collect every error the runtime reports.
fn capture_errors(rt: &Runtime) -> Rc<RefCell<Vec<ReactiveError>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    rt.set_error_handler(move |err| sink.borrow_mut().push(err.clone()));
    errors
}

/// Effects run in the order they were queued.
#[test]
fn effects_run_in_fifo_order() {
    let a = Signal::new(0);
    let b = Signal::new(0);
    let c = Signal::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let mut effects = Vec::new();
    for (name, signal) in [("a", &a), ("b", &b), ("c", &c)] {
        let (signal, order) = (signal.clone(), order.clone());
        effects.push(Effect::new(move || {
            if signal.get() > 0 {
                order.borrow_mut().push(name);
            }
        }));
    }

    batch(|| {
        c.set(1);
        a.set(1);
        b.set(1);
    });
    assert_eq!(*order.borrow(), vec!["c", "a", "b"]);
}

/// Effects on one signal run in the order they subscribed.
#[test]
fn effects_on_one_signal_run_in_creation_order() {
    let s = Signal::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));
    let _effects: Vec<_> = (0..4)
        .map(|i| {
            let (s, order) = (s.clone(), order.clone());
            Effect::new(move || {
                s.get();
                order.borrow_mut().push(i);
            })
        })
        .collect();

    order.borrow_mut().clear();
    s.set(1);
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
}

/// A write made inside an effect is picked up by the next flush pass rather
/// than recursively.
#[test]
fn effect_writes_are_drained() {
    let source = Signal::new(1);
    let mirror = Signal::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _copy = {
        let (source, mirror) = (source.clone(), mirror.clone());
        Effect::new(move || mirror.set(source.get() * 10))
    };
    let _watch = {
        let (mirror, seen) = (mirror.clone(), seen.clone());
        Effect::new(move || seen.borrow_mut().push(mirror.get()))
    };

    source.set(2);
    assert_eq!(*seen.borrow(), vec![10, 20]);
    assert_eq!(Runtime::current().stats().queued, 0);
}

/// A panicking effect is reported and does not stop the others.
#[test]
fn panicking_effect_does_not_block_others() {
    let rt = Runtime::new();
    let errors = capture_errors(&rt);
    let s = rt.signal(0);
    let runs = Rc::new(Cell::new(0));

    let bad = {
        let s = s.clone();
        rt.effect(move || {
            if s.get() == 1 {
                panic!("effect exploded");
            }
        })
    };
    let _good = {
        let (s, runs) = (s.clone(), runs.clone());
        rt.effect(move || {
            s.get();
            runs.set(runs.get() + 1);
        })
    };

    s.set(1);
    assert_eq!(runs.get(), 2);
    assert_eq!(
        *errors.borrow(),
        vec![ReactiveError::CallbackPanicked {
            node: bad.id(),
            message: "effect exploded".to_owned(),
        }]
    );

    // The failed effect stays subscribed.
    s.set(2);
    assert_eq!(runs.get(), 3);
    assert_eq!(bad.run_count(), 2);
    assert!(!bad.is_disposed());
}

/// An effect that keeps re-triggering itself is cut off after the
/// configured number of passes.
#[test]
fn flush_limit_stops_runaway_effects() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_max_flush_passes(5));
    let errors = capture_errors(&rt);
    let s = rt.signal(0);

    let effect = {
        let s = s.clone();
        rt.effect(move || {
            let next = s.get() + 1;
            s.set(next);
        })
    };

    // Creation run plus five flush passes.
    assert_eq!(effect.run_count(), 6);
    assert_eq!(s.get_untracked(), 6);
    assert_eq!(
        *errors.borrow(),
        vec![ReactiveError::FlushLimit { passes: 5 }]
    );
    assert_eq!(rt.stats().queued, 0);

    // The abandoned effect is outdated, not lost: the next write runs it.
    errors.borrow_mut().clear();
    s.set(100);
    assert!(effect.run_count() > 6);
}

/// A zero pass limit is raised to one so effects still re-run.
#[test]
fn zero_flush_passes_is_raised_to_one() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_max_flush_passes(0));
    assert_eq!(rt.config().max_flush_passes, 1);

    let s = rt.signal(0);
    let effect = {
        let s = s.clone();
        rt.effect(move || {
            s.get();
        })
    };
    s.set(1);
    s.set(2);
    assert_eq!(effect.run_count(), 3);
}

#[test]
fn default_flush_limit() {
    let rt = Runtime::new();
    assert_eq!(rt.config().max_flush_passes, DEFAULT_MAX_FLUSH_PASSES);
}

/// Releasing more edges than the pool holds never grows it past its cap.
#[test]
fn pool_never_exceeds_cap() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_max_pool_size(3));
    let signals: Vec<_> = (0..10).map(|i| rt.signal(i)).collect();
    let sum = {
        let signals = signals.clone();
        rt.computed(move || signals.iter().map(Signal::get).sum::<i32>())
    };

    assert_eq!(sum.get(), 45);
    assert_eq!(rt.stats().edges, 10);
    assert_eq!(rt.stats().pooled_edges, 0);

    sum.dispose();
    let stats = rt.stats();
    assert_eq!(stats.edges, 0);
    assert_eq!(stats.pooled_edges, 3);
    assert_eq!(stats.max_pool_size, 3);

    // Pooled edges are reused before new ones are allocated.
    let pair = {
        let (a, b) = (signals[0].clone(), signals[1].clone());
        rt.computed(move || a.get() + b.get())
    };
    assert_eq!(pair.get(), 1);
    assert_eq!(rt.stats().pooled_edges, 1);
}

/// Re-reading a stable set of producers does not churn edges.
#[test]
fn stable_reads_reuse_edges() {
    let rt = Runtime::new();
    let a = rt.signal(1);
    let b = rt.signal(2);
    let sum = {
        let (a, b) = (a.clone(), b.clone());
        rt.computed(move || a.get() + b.get())
    };

    assert_eq!(sum.get(), 3);
    for i in 0..20 {
        a.set(i);
        sum.get();
    }
    let stats = rt.stats();
    assert_eq!(stats.edges, 2);
    assert_eq!(stats.pooled_edges, 0);
}

/// An effect whose computed source panics while the flush verifies it is
/// reached again by later writes.
#[test]
fn effect_recovers_after_source_panics() {
    let rt = Runtime::new();
    let errors = capture_errors(&rt);
    let s = rt.signal(0);
    let c = {
        let s = s.clone();
        rt.computed(move || {
            let value = s.get();
            if value == 1 {
                panic!("bad input");
            }
            value
        })
    };
    let seen = Rc::new(RefCell::new(Vec::new()));
    let effect = {
        let (c, seen) = (c.clone(), seen.clone());
        rt.effect(move || seen.borrow_mut().push(c.get()))
    };

    s.set(1);
    assert_eq!(
        *errors.borrow(),
        vec![ReactiveError::CallbackPanicked {
            node: effect.id(),
            message: "bad input".to_owned(),
        }]
    );

    s.set(2);
    s.set(3);
    assert_eq!(*seen.borrow(), vec![0, 2, 3]);
    assert_eq!(effect.run_count(), 3);
    assert_eq!(c.get(), 3);

    // Failing again and recovering again.
    s.set(1);
    s.set(4);
    assert_eq!(*seen.borrow(), vec![0, 2, 3, 4]);
    assert_eq!(errors.borrow().len(), 2);
}

/// Subscriptions that panic are reported; the write still completes.
#[test]
fn panicking_subscription_is_isolated() {
    let rt = Runtime::new();
    let errors = capture_errors(&rt);
    let s = rt.signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let bad = s.subscribe(|value| {
        if *value == 1 {
            panic!("bad subscriber");
        }
    });
    let _good = {
        let seen = seen.clone();
        s.subscribe(move |value| seen.borrow_mut().push(*value))
    };

    s.set(1);
    s.set(2);
    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert_eq!(errors.borrow().len(), 1);
    assert_eq!(errors.borrow()[0].node(), Some(bad.id()));
}

/// Writing from inside a computed is refused with an error naming both
/// nodes.
#[test]
fn write_in_computed_is_an_error() {
    let rt = Runtime::new();
    let s = rt.signal(0);
    let result = Rc::new(RefCell::new(None));
    let c = {
        let (s, result) = (s.clone(), result.clone());
        rt.computed(move || {
            *result.borrow_mut() = Some(s.try_set(1));
            0
        })
    };

    c.get();
    assert_eq!(
        result.borrow_mut().take(),
        Some(Err(ReactiveError::WriteInComputed {
            signal: s.id(),
            computed: c.id(),
        }))
    );
    assert_eq!(s.get(), 0);
}

/// A computed read inside an effect keeps working after the computed is
/// disposed: the effect sees the cached value.
#[test]
fn disposed_computed_inside_effect() {
    let s = Signal::new(1);
    let c = {
        let s = s.clone();
        Computed::new(move || s.get() * 2)
    };
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _effect = {
        let (s, c, seen) = (s.clone(), c.clone(), seen.clone());
        Effect::new(move || seen.borrow_mut().push((s.get(), c.get())))
    };

    c.dispose();
    s.set(5);
    assert_eq!(*seen.borrow(), vec![(1, 2), (5, 2)]);
}

#[test]
fn config_from_json() {
    let config = RuntimeConfig::from_json(r#"{ "max_pool_size": 16, "max_flush_passes": 8 }"#)
        .unwrap();
    let rt = Runtime::with_config(config.clone());
    assert_eq!(rt.config(), &config);
    assert!(RuntimeConfig::from_json("not json").is_err());
}
