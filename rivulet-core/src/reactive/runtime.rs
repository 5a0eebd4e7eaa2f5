//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. Every session owns one runtime; nothing mutable is shared between
//! runtimes.
//!
//! # How It Works
//!
//! 1. Signals, memos and effects register a node with the runtime's graph.
//!
//! 2. While a memo or effect runs, every read is recorded (with the version
//!    observed) in the thread-local context and becomes the node's new
//!    dependency set when the run finishes.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Bumps the signal's version
//!    b. Marks direct readers dirty and everything downstream maybe dirty
//!    c. Queues affected effects
//!    d. Flushes effects in dependency order, unless a batch is open
//!
//! Memos are lazy: they are brought up to date when read. A maybe-dirty memo
//! first refreshes its derived dependencies and only recomputes if one of
//! the versions it recorded has moved.
//!
//! # Thread Safety
//!
//! The graph lives behind a `parking_lot::Mutex`. User code never runs while
//! that lock is held, so computations may freely read other nodes. A runtime
//! is meant to be driven by one stimulus at a time; see `session::worker`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::context::ReactiveContext;
use crate::error::{ReactiveError, ReactiveResult};
use crate::graph::{DirtyState, Node, NodeId, NodeKind, UpdateScheduler};

/// Identity of a runtime, used to keep context entries of different
/// sessions apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeId(u64);

impl RuntimeId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Behaviour switches for a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// When true, setting a signal to an equal value is a no-op.
    pub change_detection: bool,
    /// Upper bound on effect flush rounds within one stimulus. Exceeding it
    /// means effects keep re-triggering each other.
    pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            change_detection: true,
            max_flush_rounds: 64,
        }
    }
}

/// An effect that failed while the scheduler was flushing.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectFailure {
    pub effect: NodeId,
    pub error: ReactiveError,
}

/// A computation the runtime can run on behalf of a node.
pub(crate) trait Computation: Send + Sync {
    /// Run the user function. `Ok(true)` means the observable value changed.
    fn run(&self) -> ReactiveResult<bool>;
}

struct State {
    graph: UpdateScheduler,
    computations: HashMap<NodeId, Arc<dyn Computation>>,
    pending_effects: IndexSet<NodeId>,
}

pub(crate) struct RuntimeInner {
    id: RuntimeId,
    config: RuntimeConfig,
    state: Mutex<State>,
    batch_depth: AtomicUsize,
    flushing: AtomicBool,
    disposed: AtomicBool,
}

/// The reactive runtime of one session.
///
/// Cloning is cheap and yields another handle to the same graph. Node handles
/// only keep a weak reference, so dropping every `Runtime` handle tears the
/// graph down.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Weak handle held by signals, memos and effects.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }

    /// Upgrade, failing with `Lifecycle` if the runtime is gone or disposed.
    pub(crate) fn active(&self, operation: &'static str) -> ReactiveResult<Runtime> {
        match self.upgrade() {
            Some(runtime) if runtime.is_active() => Ok(runtime),
            _ => Err(ReactiveError::lifecycle(operation)),
        }
    }
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: RuntimeId::new(),
                config,
                state: Mutex::new(State {
                    graph: UpdateScheduler::new(),
                    computations: HashMap::new(),
                    pending_effects: IndexSet::new(),
                }),
                batch_depth: AtomicUsize::new(0),
                flushing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> RuntimeId {
        self.inner.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// False once the runtime has been disposed.
    pub fn is_active(&self) -> bool {
        !self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_active(&self, operation: &'static str) -> ReactiveResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ReactiveError::lifecycle(operation))
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.state.lock().graph.node_count()
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effect_count(&self) -> usize {
        self.inner.state.lock().pending_effects.len()
    }

    /// Add a node, together with the computation that produces it.
    pub(crate) fn register(
        &self,
        id: NodeId,
        kind: NodeKind,
        computation: Option<Arc<dyn Computation>>,
    ) -> ReactiveResult<()> {
        self.ensure_active("register a node")?;
        let mut state = self.inner.state.lock();
        state.graph.add_node(Node::with_id(id, kind));
        if let Some(computation) = computation {
            state.computations.insert(id, computation);
        }
        tracing::trace!(node = %id, ?kind, "registered node");
        Ok(())
    }

    /// Remove a node and its computation.
    pub(crate) fn unregister(&self, id: NodeId) {
        let computation = {
            let mut state = self.inner.state.lock();
            state.graph.remove_node(id);
            state.pending_effects.shift_remove(&id);
            state.computations.remove(&id)
        };
        // Dropped outside the lock: the closure may own other handles.
        drop(computation);
    }

    pub(crate) fn version_of(&self, id: NodeId) -> Option<u64> {
        self.inner.state.lock().graph.version_of(id)
    }

    pub(crate) fn state_of(&self, id: NodeId) -> Option<DirtyState> {
        self.inner
            .state
            .lock()
            .graph
            .get_node(id)
            .map(Node::dirty_state)
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.inner
            .state
            .lock()
            .graph
            .get_node(id)
            .map_or(0, Node::dependency_count)
    }

    /// Record a read of `id` by the computation currently running.
    pub(crate) fn track_read(&self, id: NodeId) {
        if !ReactiveContext::is_active() {
            return;
        }
        if let Some(version) = self.version_of(id) {
            tracing::trace!(node = %id, version, "tracked read");
            ReactiveContext::track_dependency(self.id(), id, version);
        }
    }

    /// Validate a write of `signal` against the computation currently running.
    ///
    /// Memos may not write at all. Effects may, unless the written signal
    /// feeds back into something the effect reads.
    pub(crate) fn check_write(&self, signal: NodeId) -> ReactiveResult<()> {
        match ReactiveContext::current(self.id()) {
            None | Some((_, NodeKind::Source)) => Ok(()),
            Some((node, NodeKind::Derived)) => {
                Err(ReactiveError::ReentrantMutation { node, signal })
            }
            Some((node, NodeKind::Effect)) => {
                let mut targets = ReactiveContext::current_reads(self.id());
                targets.insert(node);
                if self.inner.state.lock().graph.reaches_any(signal, &targets) {
                    return Err(ReactiveError::CyclicDependency { node });
                }
                ReactiveContext::record_write(self.id(), signal);
                Ok(())
            }
        }
    }

    /// A signal's value changed: propagate and, when idle, flush effects.
    pub(crate) fn notify_changed(&self, signal: NodeId) {
        {
            let mut state = self.inner.state.lock();
            let affected = state.graph.mark_changed(signal);
            for id in &affected {
                if state.graph.kind_of(*id) == Some(NodeKind::Effect) {
                    state.pending_effects.insert(*id);
                }
            }
            tracing::debug!(signal = %signal, affected = affected.len(), "signal changed");
        }
        self.flush_if_idle();
    }

    /// Force `id` to recompute on its next read and queue downstream effects.
    pub(crate) fn invalidate(&self, id: NodeId) {
        let mut state = self.inner.state.lock();
        let affected = state.graph.invalidate(id);
        for node in affected {
            if state.graph.kind_of(node) == Some(NodeKind::Effect) {
                state.pending_effects.insert(node);
            }
        }
    }

    /// Bring `id` up to date.
    ///
    /// Clean nodes are left alone. Maybe-dirty nodes refresh their derived
    /// dependencies first and only rerun if an observed version moved.
    pub(crate) fn refresh(&self, id: NodeId) -> ReactiveResult<()> {
        let (dirty, dependencies) = {
            let state = self.inner.state.lock();
            match state.graph.get_node(id) {
                Some(node) => (
                    node.dirty_state(),
                    node.dependencies().collect::<SmallVec<[(NodeId, u64); 8]>>(),
                ),
                None => return Ok(()),
            }
        };

        match dirty {
            DirtyState::Clean => return Ok(()),
            DirtyState::MaybeDirty => {
                let mut stale = false;
                for (dependency, seen) in dependencies {
                    let kind = self.inner.state.lock().graph.kind_of(dependency);
                    if kind == Some(NodeKind::Derived) {
                        // Memo failures are cached on the memo; readers see them on read.
                        let _ = self.refresh(dependency);
                    }
                    if self.version_of(dependency) != Some(seen) {
                        stale = true;
                        break;
                    }
                }
                if !stale {
                    if let Some(node) = self.inner.state.lock().graph.get_node_mut(id) {
                        node.mark_clean();
                    }
                    tracing::trace!(node = %id, "verified clean");
                    return Ok(());
                }
            }
            DirtyState::Dirty => {}
        }

        self.recompute(id)
    }

    fn recompute(&self, id: NodeId) -> ReactiveResult<()> {
        let (computation, kind) = {
            let state = self.inner.state.lock();
            match (state.computations.get(&id), state.graph.kind_of(id)) {
                (Some(computation), Some(kind)) => (Arc::clone(computation), kind),
                _ => return Ok(()),
            }
        };

        tracing::debug!(node = %id, ?kind, "recomputing");
        let ctx = ReactiveContext::enter(self.id(), id, kind);
        let outcome = computation.run();
        let frame = ctx.finish();

        let mut state = self.inner.state.lock();
        state.pending_effects.shift_remove(&id);
        if !state.graph.contains(id) {
            return outcome.map(|_| ());
        }
        state.graph.replace_dependencies(id, frame.dependencies);
        state.graph.set_writes(id, frame.writes);
        if let Some(node) = state.graph.get_node_mut(id) {
            node.mark_clean();
            if matches!(outcome, Ok(true)) {
                node.bump_version();
            }
        }
        outcome.map(|_| ())
    }

    /// Queue an effect for the next flush.
    pub(crate) fn schedule(&self, id: NodeId) {
        let mut state = self.inner.state.lock();
        if let Some(node) = state.graph.get_node_mut(id) {
            node.mark_dirty();
            state.pending_effects.insert(id);
        }
    }

    fn is_idle(&self) -> bool {
        self.inner.batch_depth.load(Ordering::SeqCst) == 0
            && !self.inner.flushing.load(Ordering::SeqCst)
            && ReactiveContext::current(self.id()).is_none()
    }

    /// Flush unless a batch, a flush or a computation of this runtime is in
    /// progress; those flush on their own when they finish.
    pub(crate) fn flush_if_idle(&self) -> Vec<EffectFailure> {
        if self.is_idle() && self.is_active() {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// Run every pending effect, producers before consumers.
    ///
    /// Effects queued while flushing (because an effect wrote a signal) are
    /// handled in further rounds. Failures are logged and returned.
    pub fn flush(&self) -> Vec<EffectFailure> {
        let mut failures = Vec::new();
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            return failures;
        }
        let _guard = FlushGuard(&self.inner.flushing);

        let mut rounds = 0;
        loop {
            let order = {
                let mut state = self.inner.state.lock();
                if state.pending_effects.is_empty() {
                    break;
                }
                let pending = std::mem::take(&mut state.pending_effects);
                state.graph.effect_order(&pending)
            };

            rounds += 1;
            if rounds > self.inner.config.max_flush_rounds {
                for effect in order {
                    tracing::warn!(effect = %effect, rounds, "effects keep re-triggering each other");
                    failures.push(EffectFailure {
                        effect,
                        error: ReactiveError::CyclicDependency { node: effect },
                    });
                }
                break;
            }

            for effect in order {
                if let Err(error) = self.refresh(effect) {
                    tracing::warn!(effect = %effect, %error, "effect failed");
                    failures.push(EffectFailure { effect, error });
                }
            }
        }
        failures
    }

    /// Apply every write made by `f` before any effect runs, then flush once.
    ///
    /// Nested batches flush when the outermost one ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> (R, Vec<EffectFailure>) {
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        let result = {
            let _depth = DepthGuard(&self.inner.batch_depth);
            f()
        };
        (result, self.flush_if_idle())
    }

    /// Tear the graph down. Later writes fail with `Lifecycle`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let computations = {
            let mut state = self.inner.state.lock();
            state.graph.clear();
            state.pending_effects.clear();
            std::mem::take(&mut state.computations)
        };
        tracing::debug!(runtime = ?self.id(), nodes = computations.len(), "runtime disposed");
        drop(computations);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("node_count", &self.node_count())
            .finish()
    }
}
