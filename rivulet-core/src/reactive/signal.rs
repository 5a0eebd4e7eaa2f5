//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tells its runtime when that value changes.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    read is recorded as a dependency of that computation.
//!
//! 2. When a signal's value changes, its version is bumped and the runtime
//!    marks every reader dirty.
//!
//! 3. Effects rerun eagerly; memos rerun the next time they are read.
//!
//! # Memory Layout
//!
//! Each signal handle consists of:
//! - Its node id (8 bytes)
//! - The value, shared behind `Arc<RwLock<T>>`
//! - A weak reference to the owning runtime

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::{Runtime, WeakRuntime};
use crate::error::ReactiveResult;
use crate::graph::{NodeId, NodeKind};

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let count = Signal::new(&runtime, 0);
///
/// let value = count.get();
/// count.set(5)?;
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: NodeId,
    value: Arc<RwLock<T>>,
    runtime: WeakRuntime,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    ///
    /// A signal created on a disposed runtime is inert: it holds its value
    /// but every write fails with `Lifecycle`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        let id = NodeId::new();
        if let Err(error) = runtime.register(id, NodeKind::Source, None) {
            tracing::debug!(signal = %id, %error, "signal created on inactive runtime");
        }
        Self {
            id,
            value: Arc::new(RwLock::new(value)),
            runtime: runtime.downgrade(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value.
    ///
    /// If called while a memo or effect of the same runtime is running, the
    /// read is recorded as one of its dependencies.
    pub fn get(&self) -> T {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track_read(self.id);
        }
        self.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Number of effective writes so far.
    pub fn version(&self) -> u64 {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.version_of(self.id))
            .unwrap_or(0)
    }

    /// Set a new value and notify dependents.
    ///
    /// With change detection enabled, writing an equal value does nothing.
    /// Failures of effects triggered by this write are logged and recorded
    /// on the effects; they do not fail the write.
    pub fn set(&self, value: T) -> ReactiveResult<()> {
        let runtime = self.runtime.active("set a signal")?;
        runtime.check_write(self.id)?;

        {
            let mut guard = self.value.write();
            if runtime.config().change_detection && *guard == value {
                return Ok(());
            }
            *guard = value;
        }

        runtime.notify_changed(self.id);
        Ok(())
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F) -> ReactiveResult<()>
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&*guard)
        };
        self.set(new_value)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("version", &self.version())
            .finish()
    }
}
