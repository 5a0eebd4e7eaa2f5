//! Memo Implementation
//!
//! A Memo (a "calc") is a cached derived value that re-evaluates only when
//! its dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the memo is marked dirty or maybe dirty.
//!
//! 4. On next access, a maybe-dirty memo re-checks the versions it observed.
//!
//! 5. If one moved, recompute. Otherwise, mark clean and return the cache.
//!
//! Dependencies are rediscovered on every run, so a memo that reads `x` only
//! while `flag` is true stops reacting to `x` once it has run with `flag`
//! false.
//!
//! # Failures
//!
//! A failing computation is memoized like a value: readers get the same
//! error until a dependency changes. The last good value is kept and
//! available through [`Memo::cached`].

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::{Computation, Runtime, WeakRuntime};
use crate::error::{BoxError, ReactiveError, ReactiveResult};
use crate::graph::{DirtyState, NodeId, NodeKind};

type ComputeFn<T> = dyn Fn() -> Result<T, BoxError> + Send + Sync;

struct MemoCache<T> {
    value: Option<T>,
    error: Option<ReactiveError>,
    runs: usize,
}

struct MemoInner<T> {
    id: NodeId,
    compute: Box<ComputeFn<T>>,
    cache: RwLock<MemoCache<T>>,
}

impl<T> Computation for MemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn run(&self) -> ReactiveResult<bool> {
        let result = (self.compute)();

        let mut cache = self.cache.write();
        cache.runs += 1;
        let changed = match result {
            Ok(value) => {
                let changed = cache.error.is_some() || cache.value.as_ref() != Some(&value);
                cache.value = Some(value);
                cache.error = None;
                changed
            }
            Err(error) => {
                let error = ReactiveError::from_compute(self.id, error);
                tracing::debug!(memo = %self.id, %error, "memo computation failed");
                cache.error = Some(error);
                true
            }
        };
        Ok(changed)
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound lets the memo tell readers apart from "recomputed
/// to the same value", in which case nothing downstream reruns.
pub struct Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: NodeId,
    inner: Arc<MemoInner<T>>,
    runtime: WeakRuntime,
}

impl<T> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        let inner = Arc::new(MemoInner {
            id,
            compute: Box::new(compute),
            cache: RwLock::new(MemoCache {
                value: None,
                error: None,
                runs: 0,
            }),
        });
        let computation: Arc<dyn Computation> = inner.clone();
        if let Err(error) = runtime.register(id, NodeKind::Derived, Some(computation)) {
            tracing::debug!(memo = %id, %error, "memo created on inactive runtime");
        }
        Self {
            id,
            inner,
            runtime: runtime.downgrade(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside another computation this also records the memo as a
    /// dependency. Reading a memo from its own computation (directly or
    /// through others) fails with `CyclicDependency`.
    pub fn get(&self) -> ReactiveResult<T> {
        let runtime = self.runtime.active("read a memo")?;
        if ReactiveContext::is_evaluating(runtime.id(), self.id) {
            return Err(ReactiveError::CyclicDependency { node: self.id });
        }

        runtime.refresh(self.id)?;
        runtime.track_read(self.id);

        let cache = self.inner.cache.read();
        if let Some(error) = &cache.error {
            return Err(error.clone());
        }
        cache
            .value
            .clone()
            .ok_or(ReactiveError::lifecycle("read a memo"))
    }

    /// The last successfully computed value, without refreshing or tracking.
    pub fn cached(&self) -> Option<T> {
        self.inner.cache.read().value.clone()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.cache.read().value.is_some()
    }

    /// Number of times the computation has run.
    pub fn run_count(&self) -> usize {
        self.inner.cache.read().runs
    }

    /// Get the current dirty state. Memos of a torn-down runtime read as dirty.
    pub fn state(&self) -> DirtyState {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.state_of(self.id))
            .unwrap_or(DirtyState::Dirty)
    }

    /// Force a recompute on next access, invalidating everything downstream.
    pub fn mark_dirty(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.invalidate(self.id);
        }
    }

    /// Number of nodes read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.id))
    }

    /// Take the memo out of the graph. Handles still around keep returning
    /// the last cached result and never recompute.
    pub(crate) fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister(self.id);
        }
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("cached", &self.cached())
            .field("run_count", &self.run_count())
            .finish()
    }
}
