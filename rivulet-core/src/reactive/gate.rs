//! Event Gates
//!
//! An event gate is a computation that only reacts to one trigger signal,
//! typically the click counter of an "Apply" button. Everything its body
//! reads is isolated: the body sees the latest values, but changing them
//! does not rerun it. Only a new trigger value does.
//!
//! Two switches decide whether the body runs at all:
//!
//! - `ignore_initial`: do not run until the trigger has changed since the
//!   gate was created.
//! - `ignore_none`: do not run while the trigger is unset (a button that was
//!   never clicked, an empty selection).
//!
//! While the body does not run, the gate yields `None`.

use serde::{Deserialize, Serialize};

use super::context::untrack;
use super::effect::Effect;
use super::memo::Memo;
use super::runtime::Runtime;
use super::signal::Signal;
use crate::error::{BoxError, ReactiveResult};
use crate::graph::{DirtyState, NodeId};
use crate::value::Value;

/// A value that can drive an event gate.
pub trait Trigger: Clone + PartialEq + Send + Sync + 'static {
    /// Whether the trigger holds its "nothing happened" value.
    fn is_unset(&self) -> bool;
}

macro_rules! counter_trigger {
    ($($ty:ty),*) => {
        $(
            impl Trigger for $ty {
                fn is_unset(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

counter_trigger!(u32, u64, usize, i32, i64);

impl Trigger for bool {
    fn is_unset(&self) -> bool {
        !*self
    }
}

impl Trigger for String {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Trigger for Option<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

impl Trigger for Value {
    fn is_unset(&self) -> bool {
        match self {
            Value::Null | Value::Bool(false) | Value::Int(0) => true,
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }
}

/// When an event gate lets its body run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateOptions {
    /// Wait for the trigger to change after the gate is created.
    pub ignore_initial: bool,
    /// Skip while the trigger value is unset.
    pub ignore_none: bool,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            ignore_initial: false,
            ignore_none: true,
        }
    }
}

impl GateOptions {
    /// Options for a gate that waits for the first explicit event.
    pub fn on_change() -> Self {
        Self {
            ignore_initial: true,
            ..Self::default()
        }
    }

    /// Whether the body should run for `value`. `fired` is true once the
    /// trigger has changed since the gate was created.
    pub fn should_run<S: Trigger>(&self, value: &S, fired: bool) -> bool {
        if self.ignore_none && value.is_unset() {
            return false;
        }
        !(self.ignore_initial && !fired)
    }
}

/// A memoized computation that only recomputes when its trigger changes.
///
/// # Example
///
/// ```rust,ignore
/// let apply = Signal::new(&runtime, 0u32);
/// let year = Signal::new(&runtime, 2021);
///
/// let selected = year.clone();
/// let filtered = EventGate::new(&runtime, &apply, GateOptions::on_change(), move || {
///     Ok(selected.get() * 10)
/// });
///
/// year.set(2022)?;           // nothing happens
/// apply.update(|n| n + 1)?;  // now the body runs and sees 2022
/// ```
pub struct EventGate<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    memo: Memo<Option<T>>,
    options: GateOptions,
}

impl<T> EventGate<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new<S, F>(runtime: &Runtime, trigger: &Signal<S>, options: GateOptions, body: F) -> Self
    where
        S: Trigger,
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let created_at = trigger.version();
        let source = trigger.clone();
        let memo = Memo::new(runtime, move || {
            let value = source.get();
            let fired = source.version() != created_at;
            if !options.should_run(&value, fired) {
                return Ok(None);
            }
            untrack(&body).map(Some)
        });

        if !options.ignore_initial {
            if let Err(error) = memo.get() {
                tracing::debug!(gate = %memo.id(), %error, "event gate failed on first run");
            }
        }

        Self { memo, options }
    }

    /// The body's latest result, or `None` if it has not run.
    pub fn get(&self) -> ReactiveResult<Option<T>> {
        self.memo.get()
    }

    pub fn id(&self) -> NodeId {
        self.memo.id()
    }

    pub fn options(&self) -> GateOptions {
        self.options
    }

    pub fn state(&self) -> DirtyState {
        self.memo.state()
    }

    /// The last successful result without refreshing.
    pub fn cached(&self) -> Option<T> {
        self.memo.cached().flatten()
    }
}

impl<T> Clone for EventGate<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            memo: self.memo.clone(),
            options: self.options,
        }
    }
}

impl<T> std::fmt::Debug for EventGate<T>
where
    T: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventGate")
            .field("memo", &self.memo)
            .field("options", &self.options)
            .finish()
    }
}

impl Effect {
    /// An effect that runs `body` only when `trigger` changes, with the same
    /// gating rules as [`EventGate`]. Reads inside `body` are isolated.
    pub fn on_event<S, F>(
        runtime: &Runtime,
        trigger: &Signal<S>,
        options: GateOptions,
        body: F,
    ) -> ReactiveResult<Effect>
    where
        S: Trigger,
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let created_at = trigger.version();
        let source = trigger.clone();
        Effect::new(runtime, move || {
            let value = source.get();
            let fired = source.version() != created_at;
            if options.should_run(&value, fired) {
                untrack(&body)
            } else {
                Ok(())
            }
        })
    }
}
