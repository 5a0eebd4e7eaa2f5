//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued with the runtime.
//!
//! 3. The runtime flushes queued effects in dependency order once the
//!    current write (or batch) is complete. Each run rediscovers the
//!    effect's dependencies.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Effects may write signals. Memos may not.
//!
//! # Failures
//!
//! A failed run is logged, kept in [`Effect::last_error`] and reported by the
//! flush that ran it. The effect stays registered and runs again on the next
//! change. The one exception is a write that feeds back into the effect: if
//! that happens on the first run, registration is rolled back.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::{Computation, Runtime, WeakRuntime};
use crate::error::{BoxError, ReactiveError, ReactiveResult};
use crate::graph::{NodeId, NodeKind};

type EffectFn = dyn Fn() -> Result<(), BoxError> + Send + Sync;

struct EffectInner {
    id: NodeId,
    run: Box<EffectFn>,
    runs: AtomicUsize,
    last_error: RwLock<Option<ReactiveError>>,
    disposed: AtomicBool,
}

impl Computation for EffectInner {
    fn run(&self) -> ReactiveResult<bool> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        match (self.run)() {
            Ok(()) => {
                *self.last_error.write() = None;
                Ok(false)
            }
            Err(error) => {
                let error = ReactiveError::from_compute(self.id, error);
                *self.last_error.write() = Some(error.clone());
                Err(error)
            }
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let count = Signal::new(&runtime, 0);
///
/// let reader = count.clone();
/// let effect = Effect::new(&runtime, move || {
///     println!("Count is: {}", reader.get());
///     Ok(())
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
pub struct Effect {
    id: NodeId,
    inner: Arc<EffectInner>,
    runtime: WeakRuntime,
}

impl Effect {
    /// Create a new effect and run it once to establish its dependencies.
    ///
    /// Fails with `CyclicDependency` (and leaves the graph as it was) if the
    /// first run writes a signal the effect itself depends on. Any other
    /// failure of the first run is recorded on the effect, which stays
    /// registered.
    pub fn new<F>(runtime: &Runtime, run: F) -> ReactiveResult<Self>
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let effect = Self::register(runtime, run)?;

        if let Err(error) = runtime.refresh(effect.id) {
            if matches!(error, ReactiveError::CyclicDependency { .. }) {
                effect.dispose();
                tracing::warn!(effect = %effect.id, %error, "effect rejected");
                return Err(error);
            }
            tracing::warn!(effect = %effect.id, %error, "effect failed on first run");
        }

        // Signals written by the first run may have queued other effects.
        runtime.flush_if_idle();
        Ok(effect)
    }

    /// Create a new effect without running it immediately.
    ///
    /// The effect is queued and first runs at the next flush.
    pub fn new_lazy<F>(runtime: &Runtime, run: F) -> ReactiveResult<Self>
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let effect = Self::register(runtime, run)?;
        runtime.schedule(effect.id);
        Ok(effect)
    }

    fn register<F>(runtime: &Runtime, run: F) -> ReactiveResult<Self>
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let inner = Arc::new(EffectInner {
            id,
            run: Box::new(run),
            runs: AtomicUsize::new(0),
            last_error: RwLock::new(None),
            disposed: AtomicBool::new(false),
        });
        let computation: Arc<dyn Computation> = inner.clone();
        runtime.register(id, NodeKind::Effect, Some(computation))?;
        Ok(Self {
            id,
            inner,
            runtime: runtime.downgrade(),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Run the effect now, regardless of whether its dependencies changed.
    pub fn execute(&self) -> ReactiveResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let runtime = self.runtime.active("run an effect")?;
        runtime.invalidate(self.id);
        let result = runtime.refresh(self.id);
        runtime.flush_if_idle();
        result
    }

    /// Queue the effect and flush unless a batch is open.
    pub fn schedule(&self) {
        if self.is_disposed() {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.schedule(self.id);
            runtime.flush_if_idle();
        }
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again and is removed from the
    /// graph.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// The failure of the most recent run, if it failed.
    pub fn last_error(&self) -> Option<ReactiveError> {
        self.inner.last_error.read().clone()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.id))
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
