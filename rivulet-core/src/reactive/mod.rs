//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, effects
//! and event gates, all owned by a per-session [`Runtime`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the read is recorded
//! as a dependency of that computation. When the signal's value changes, all
//! dependents are invalidated.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only when it is read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects may write signals; the runtime orders them so that an
//! effect producing a value runs before the effects that consume it.
//!
//! ## Event gates
//!
//! An [`EventGate`] reacts to a single trigger signal and isolates every other
//! read of its body, for "recompute when Apply is clicked" flows.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context of the same runtime and, if so, record the dependency.

mod context;
mod effect;
mod gate;
mod memo;
mod runtime;
mod signal;

pub use context::untrack;
pub use effect::Effect;
pub use gate::{EventGate, GateOptions, Trigger};
pub use memo::Memo;
pub use runtime::{EffectFailure, Runtime, RuntimeConfig, RuntimeId};
pub use signal::Signal;

pub use crate::graph::DirtyState;
