//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds,
//! effects and subscriptions. It owns the dependency graph and the reactive
//! context, refreshes stale nodes and drains the effect queue.
//!
//! # How It Works
//!
//! 1. Creating a primitive inserts a node into the graph. Typed handles keep
//!    the value; the graph only knows the node's kind and its body.
//!
//! 2. Reading a producer inside a running consumer records an edge stamped
//!    with the producer's version.
//!
//! 3. Writing a signal walks its targets: direct consumers become outdated,
//!    everything downstream becomes notified. Effects are queued,
//!    subscriptions run before the write returns.
//!
//! 4. Reading a stale computed (or running a queued effect) refreshes it:
//!    an explicit stack of frames walks stale ancestors in first-read order,
//!    recomputing only those whose sources actually changed.
//!
//! # Borrowing
//!
//! Graph state sits in a single `RefCell`. The runtime never holds that
//! borrow while user code runs; every body is cloned out as an
//! `Rc<dyn Computation>` first, and bookkeeping after the run happens in a
//! guard so it also runs when the body panics.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::thread;

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use super::context::ReactiveContext;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{Computation, EdgeId, Flags, Graph, NodeId, NodeKind, Status, Step};

/// Graph and context, borrowed together.
pub(crate) struct State {
    pub(crate) graph: Graph,
    pub(crate) ctx: ReactiveContext,
}

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

struct RuntimeInner {
    state: RefCell<State>,
    config: RuntimeConfig,
    error_handler: RefCell<Option<ErrorHandler>>,
}

/// An independent reactive engine.
///
/// Cloning a `Runtime` yields another handle to the same engine. Every
/// thread has a default runtime, used by [`Signal::new`](crate::Signal::new)
/// and the other free-standing constructors; create more with
/// [`Runtime::new`] to keep graphs apart.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Non-owning runtime handle kept by primitives.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

/// Counters describing the state of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Live nodes of every kind.
    pub nodes: usize,
    /// Live dependency edges.
    pub edges: usize,
    /// Idle edges held by the pool.
    pub pooled_edges: usize,
    pub max_pool_size: usize,
    /// Effects waiting for the next flush.
    pub queued: usize,
    /// Global version, bumped on every effective signal write.
    pub version: u64,
    pub batch_depth: u32,
}

/// One node being refreshed.
#[derive(Debug, Clone, Copy)]
struct Frame {
    node: NodeId,
    /// Next source edge to verify; walks from the tail towards the head.
    cursor: Option<EdgeId>,
    /// A source changed (or the node was outdated): re-run it.
    dirty: bool,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given tunables.
    ///
    /// A `max_flush_passes` of zero would abandon every flush; it is raised
    /// to one.
    pub fn with_config(mut config: RuntimeConfig) -> Self {
        if let Err(err) = config.validate() {
            warn!(error = %err, "invalid runtime config, using one flush pass");
            config.max_flush_passes = 1;
        }
        let graph = Graph::new(config.max_pool_size);
        Self {
            inner: Rc::new(RuntimeInner {
                state: RefCell::new(State {
                    graph,
                    ctx: ReactiveContext::new(),
                }),
                config,
                error_handler: RefCell::new(None),
            }),
        }
    }

    /// The calling thread's default runtime.
    pub fn current() -> Self {
        CURRENT.with(Runtime::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    fn state(&self) -> Ref<'_, State> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, State> {
        self.inner.state.borrow_mut()
    }

    /// Whether two handles refer to the same engine.
    pub fn same(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// Replace the handler that receives errors from effects,
    /// subscriptions, cleanups and aborted flushes.
    ///
    /// The default handler logs through `tracing::error!`.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ReactiveError) + 'static,
    {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Restore the default logging handler.
    pub fn clear_error_handler(&self) {
        self.inner.error_handler.borrow_mut().take();
    }

    pub(crate) fn report(&self, err: ReactiveError) {
        let handler = self.inner.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&err),
            None => error!(error = %err, "reactive callback failed"),
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn stats(&self) -> GraphStats {
        let state = self.state();
        GraphStats {
            nodes: state.graph.node_count(),
            edges: state.graph.edge_count(),
            pooled_edges: state.graph.pooled_edges(),
            max_pool_size: state.graph.max_pool_size(),
            queued: state.graph.scheduler().len(),
            version: state.ctx.version,
            batch_depth: state.ctx.batch_depth,
        }
    }

    /// Global version, bumped on every effective signal write.
    pub fn version(&self) -> u64 {
        self.state().ctx.version
    }

    pub fn is_batching(&self) -> bool {
        self.state().ctx.is_batching()
    }

    pub(crate) fn flags(&self, id: NodeId) -> Option<Flags> {
        self.state().graph.get(id).map(|node| node.flags)
    }

    /// Whether `id` is in the graph and not disposed.
    pub(crate) fn is_live(&self, id: NodeId) -> bool {
        self.flags(id)
            .is_some_and(|flags| !flags.contains(Flags::DISPOSED))
    }

    pub(crate) fn source_count(&self, id: NodeId) -> usize {
        self.state().graph.source_count(id)
    }

    pub(crate) fn target_count(&self, id: NodeId) -> usize {
        self.state().graph.target_count(id)
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn create(&self, kind: NodeKind) -> NodeId {
        self.state_mut().graph.insert(kind)
    }

    /// Dispose of a node. Idempotent.
    ///
    /// A node disposed while its own body runs is torn down when the run
    /// ends. Otherwise its edges are dropped at once and, for effects, the
    /// pending cleanup runs.
    pub(crate) fn dispose(&self, id: NodeId) {
        let removed = {
            let mut state = self.state_mut();
            let Some(node) = state.graph.get_mut(id) else {
                return;
            };
            if node.flags.contains(Flags::DISPOSED) {
                return;
            }
            node.flags.insert(Flags::DISPOSED);
            if node.flags.contains(Flags::RUNNING) {
                debug!(node = %id, "deferred disposal of running node");
                return;
            }
            state.graph.remove(id)
        };

        debug!(node = %id, "disposed node");
        if let Some(body) = removed.as_ref().and_then(NodeKind::body) {
            self.run_cleanup(id, body);
        }
    }

    /// Run a body's cleanup outside any tracking scope, reporting panics.
    fn run_cleanup(&self, id: NodeId, body: &Rc<dyn Computation>) {
        self.run_isolated(id, || {
            self.untrack(|| body.cleanup());
            Ok(())
        });
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Record a read of `source` by the running consumer, if any.
    pub(crate) fn track(&self, source: NodeId) -> Option<EdgeId> {
        let mut state = self.state_mut();
        let State { graph, ctx } = &mut *state;
        let consumer = ctx.tracking_consumer(graph)?;
        let producer = graph.get(source)?;
        if producer.flags.contains(Flags::DISPOSED) {
            return None;
        }
        let version = producer.version;
        Some(graph.add_dependency(source, consumer, version))
    }

    /// Stamp a tracked edge with the producer's post-refresh version.
    pub(crate) fn confirm(&self, edge: EdgeId, source: NodeId) {
        self.state_mut().graph.confirm_edge(edge, source);
    }

    /// Cycle error for a computed read while it is executing.
    pub(crate) fn reentry(&self, node: NodeId) -> ReactiveError {
        ReactiveError::Cycle {
            node,
            path: self.state().ctx.cycle_path(node),
        }
    }

    /// Bring a computed up to date, converting errors raised by nested
    /// reads back into `Err`. Other panics keep unwinding.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<(), ReactiveError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.update(id))) {
            Ok(result) => result,
            Err(payload) => match payload.downcast::<ReactiveError>() {
                Ok(err) => Err(*err),
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Reject writes made while a computed is evaluating.
    pub(crate) fn check_write(&self, signal: NodeId) -> Result<(), ReactiveError> {
        let state = self.state();
        match state.ctx.evaluating_computed(&state.graph) {
            Some(computed) => Err(ReactiveError::WriteInComputed { signal, computed }),
            None => Ok(()),
        }
    }

    /// Propagate a change of `signal`'s value.
    pub(crate) fn write(&self, signal: NodeId) {
        let eager = {
            let mut state = self.state_mut();
            let State { graph, ctx } = &mut *state;
            let Some(node) = graph.get_mut(signal) else {
                return;
            };
            if node.flags.contains(Flags::DISPOSED) {
                return;
            }
            node.version += 1;
            let version = ctx.bump_version();
            trace!(signal = %signal, version, "signal written");
            graph.invalidate(signal)
        };

        self.batch(|| {
            for id in eager {
                self.run_eager(id);
            }
        });
    }

    /// Run a subscription reached by a write before the write returns.
    ///
    /// A subscription that writes its own producer is already running; the
    /// outer call notices it went stale again and loops, up to the flush pass
    /// limit.
    fn run_eager(&self, id: NodeId) {
        let limit = self.inner.config.max_flush_passes;
        for _ in 0..limit {
            let status = {
                let state = self.state();
                state.graph.status(id, state.ctx.version)
            };
            match status {
                None | Some(Status::Fresh) | Some(Status::Running) => return,
                Some(Status::Check) | Some(Status::Dirty) => {
                    if !self.run_isolated(id, || self.update(id)) {
                        return;
                    }
                }
            }
        }
        warn!(node = %id, passes = limit, "subscription kept re-triggering itself");
        self.report(ReactiveError::FlushLimit { passes: limit });
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Run `f` with effect flushing deferred until the outermost batch ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.state_mut().ctx.batch_depth += 1;
        let _guard = BatchGuard { runtime: self };
        f()
    }

    /// Run `f` without recording dependencies on the current consumer.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.state_mut().ctx.enter(None);
        let _guard = UntrackGuard {
            runtime: self,
            previous,
        };
        f()
    }

    /// Drain the effect queue.
    ///
    /// Does nothing inside a batch or a running flush; the outer call picks
    /// the work up. Effects queued while a pass runs go to the next pass.
    pub fn flush(&self) {
        {
            let mut state = self.state_mut();
            if state.ctx.flushing
                || state.ctx.is_batching()
                || state.graph.scheduler().is_empty()
            {
                return;
            }
            state.ctx.flushing = true;
        }
        let _guard = FlushGuard { runtime: self };

        let limit = self.inner.config.max_flush_passes;
        let mut passes = 0;
        loop {
            let pass = self.state_mut().graph.scheduler_mut().take();
            if pass.is_empty() {
                break;
            }
            passes += 1;
            if passes > limit {
                self.state_mut().graph.abandon(pass);
                warn!(passes = limit, "effect flush did not settle, dropping queued effects");
                self.report(ReactiveError::FlushLimit { passes: limit });
                break;
            }

            debug!(pass = passes, effects = pass.len(), "flushing effects");
            for id in pass {
                if self.state_mut().graph.dequeue(id) {
                    self.run_isolated(id, || self.update(id));
                }
            }
        }
    }

    /// Run `f`, reporting both returned errors and panics instead of
    /// propagating them. Returns whether `f` succeeded.
    pub(crate) fn run_isolated(
        &self,
        id: NodeId,
        f: impl FnOnce() -> Result<(), ReactiveError>,
    ) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                self.report(err);
                false
            }
            Err(payload) => {
                self.report(error_from_panic(id, payload));
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Bring `root` up to date.
    ///
    /// Walks stale sources depth first with an explicit stack. Each frame
    /// verifies its node's sources in first-read order and stops at the
    /// first one whose version moved; only then does the node re-run.
    ///
    /// If a run below fails, the nodes still waiting on the stack lose their
    /// notification so that the next write reaches them again.
    pub(crate) fn update(&self, root: NodeId) -> Result<(), ReactiveError> {
        let mut stack: SmallVec<[Frame; 8]> = SmallVec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.walk(root, &mut stack)));
        if !matches!(outcome, Ok(Ok(()))) && !stack.is_empty() {
            debug!(node = %root, pending = stack.len(), "refresh failed");
            self.state_mut()
                .graph
                .release_notified(stack.iter().map(|frame| frame.node));
        }
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn walk(&self, root: NodeId, stack: &mut SmallVec<[Frame; 8]>) -> Result<(), ReactiveError> {
        let mut visiting: IndexSet<NodeId> = IndexSet::new();

        match self.open_frame(root)? {
            Some(frame) => {
                visiting.insert(root);
                stack.push(frame);
            }
            None => return Ok(()),
        }

        while let Some(frame) = stack.last_mut() {
            if frame.dirty {
                let id = frame.node;
                stack.pop();
                visiting.pop();
                let fresh = {
                    let state = self.state();
                    matches!(
                        state.graph.status(id, state.ctx.version),
                        None | Some(Status::Fresh)
                    )
                };
                if !fresh {
                    let structure = self.state().graph.structure();
                    self.execute(id)?;
                    if self.state().graph.structure() != structure {
                        self.revalidate(stack, &mut visiting);
                    }
                }
                continue;
            }

            let step = {
                let state = self.state();
                state.graph.step(frame.cursor, state.ctx.version)
            };
            match step {
                Step::Advance(next) => frame.cursor = next,
                Step::Changed => frame.dirty = true,
                Step::Verified => {
                    let id = frame.node;
                    stack.pop();
                    visiting.pop();
                    let mut state = self.state_mut();
                    let version = state.ctx.version;
                    state.graph.mark_verified(id, version);
                }
                Step::Descend(source) => {
                    if visiting.contains(&source) {
                        return Err(self.cycle(source, &visiting));
                    }
                    if let Some(child) = self.open_frame(source)? {
                        visiting.insert(source);
                        stack.push(child);
                    }
                }
                Step::Cycle(source) => return Err(self.cycle(source, &visiting)),
            }
        }

        Ok(())
    }

    /// Frame for a node that needs work, `None` if it is fresh or gone.
    fn open_frame(&self, id: NodeId) -> Result<Option<Frame>, ReactiveError> {
        let state = self.state();
        let frame = match state.graph.status(id, state.ctx.version) {
            None | Some(Status::Fresh) => None,
            Some(Status::Running) => {
                return Err(ReactiveError::Cycle {
                    node: id,
                    path: state.ctx.cycle_path(id),
                })
            }
            Some(Status::Dirty) => Some(Frame {
                node: id,
                cursor: None,
                dirty: true,
            }),
            Some(Status::Check) => Some(Frame {
                node: id,
                cursor: state.graph.sources_tail(id),
                dirty: false,
            }),
        };
        Ok(frame)
    }

    /// Re-anchor the frames below a node that just ran.
    ///
    /// Only needed when the run removed nodes or edges the frames may be
    /// pointing at. Frames for dead nodes go; a frame whose cursor edge no
    /// longer feeds it restarts from its tail.
    fn revalidate(&self, stack: &mut SmallVec<[Frame; 8]>, visiting: &mut IndexSet<NodeId>) {
        let state = self.state();
        let graph = &state.graph;
        stack.retain(|frame| {
            graph
                .get(frame.node)
                .is_some_and(|node| !node.flags.contains(Flags::DISPOSED))
        });
        for frame in stack.iter_mut() {
            if let Some(cursor) = frame.cursor {
                if !graph.edge_feeds(cursor, frame.node) {
                    frame.cursor = graph.sources_tail(frame.node);
                }
            }
        }
        visiting.clear();
        visiting.extend(stack.iter().map(|frame| frame.node));
    }

    fn cycle(&self, node: NodeId, visiting: &IndexSet<NodeId>) -> ReactiveError {
        let mut path: Vec<NodeId> = match visiting.get_index_of(&node) {
            Some(start) => visiting.iter().skip(start).copied().collect(),
            None => {
                let mut path = self.state().ctx.cycle_path(node);
                path.pop();
                path.extend(visiting.iter().copied());
                path
            }
        };
        path.push(node);
        debug!(node = %node, depth = path.len(), "cycle detected");
        ReactiveError::Cycle { node, path }
    }

    /// Run a consumer's body once, re-recording its sources.
    pub(crate) fn execute(&self, id: NodeId) -> Result<(), ReactiveError> {
        let (body, computed) = {
            let state = self.state();
            let Some(node) = state.graph.get(id) else {
                return Ok(());
            };
            if node.flags.contains(Flags::DISPOSED) {
                return Ok(());
            }
            if node.flags.contains(Flags::RUNNING) {
                return Err(ReactiveError::Cycle {
                    node: id,
                    path: state.ctx.cycle_path(id),
                });
            }
            let Some(body) = node.kind.body() else {
                return Ok(());
            };
            (Rc::clone(body), node.kind.is_computed())
        };

        if !computed {
            self.untrack(|| body.cleanup());
        }

        let previous = {
            let mut state = self.state_mut();
            let State { graph, ctx } = &mut *state;
            let version = ctx.version;
            let Some(node) = graph.get_mut(id) else {
                return Ok(());
            };
            if node.flags.contains(Flags::DISPOSED) {
                return Ok(());
            }
            node.flags.remove(Flags::STALE);
            node.flags.insert(Flags::RUNNING);
            node.global_version = version;
            graph.prepare_sources(id);
            if !computed {
                ctx.batch_depth += 1;
            }
            ctx.push_running(id)
        };

        trace!(node = %id, "executing");
        let mut guard = RunGuard {
            runtime: self,
            node: id,
            previous,
            computed,
            changed: None,
        };
        guard.changed = Some(body.execute());
        drop(guard);
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(_) => f.debug_struct("Runtime").field("stats", &self.stats()).finish(),
            Err(_) => f.debug_struct("Runtime").finish_non_exhaustive(),
        }
    }
}

/// Convert a caught panic payload into the error to report.
pub(crate) fn error_from_panic(node: NodeId, payload: Box<dyn Any + Send>) -> ReactiveError {
    match payload.downcast::<ReactiveError>() {
        Ok(err) => *err,
        Err(payload) => ReactiveError::CallbackPanicked {
            node,
            message: panic_message(payload.as_ref()),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Finishes a run: restores the context, drops edges the run no longer
/// read and applies deferred disposal.
struct RunGuard<'a> {
    runtime: &'a Runtime,
    node: NodeId,
    previous: Option<NodeId>,
    computed: bool,
    /// `None` while the body has not returned.
    changed: Option<bool>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let removed = {
            let mut state = self.runtime.state_mut();
            let State { graph, ctx } = &mut *state;
            ctx.pop_running(self.node, self.previous);
            if !self.computed {
                ctx.batch_depth = ctx.batch_depth.saturating_sub(1);
            }

            let swept = graph.sweep_sources(self.node);
            if swept > 0 {
                trace!(node = %self.node, swept, "dropped stale sources");
            }

            match graph.get_mut(self.node) {
                None => None,
                Some(node) => {
                    node.flags.remove(Flags::RUNNING);
                    if self.computed {
                        match self.changed {
                            Some(true) => node.version += 1,
                            Some(false) => {}
                            None => node.flags.insert(Flags::OUTDATED),
                        }
                    }
                    if node.flags.contains(Flags::DISPOSED) {
                        graph.remove(self.node)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(kind) = removed {
            debug!(node = %self.node, "disposed node after its run");
            if !thread::panicking() {
                if let Some(body) = kind.body() {
                    self.runtime.run_cleanup(self.node, body);
                }
            }
        }
    }
}

struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let outermost = {
            let mut state = self.runtime.state_mut();
            state.ctx.batch_depth = state.ctx.batch_depth.saturating_sub(1);
            state.ctx.batch_depth == 0
        };
        // Queued effects wait for the next flush when unwinding.
        if outermost && !thread::panicking() {
            self.runtime.flush();
        }
    }
}

struct UntrackGuard<'a> {
    runtime: &'a Runtime,
    previous: Option<NodeId>,
}

impl Drop for UntrackGuard<'_> {
    fn drop(&mut self) {
        self.runtime.state_mut().ctx.enter(self.previous);
    }
}

struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.state_mut().ctx.flushing = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
