//! Sessions
//!
//! A session is one client connection. It owns a private [`Runtime`] with the
//! client's input signals and the outputs wired to them, and holds a shared
//! reference to the process-wide [`ReferenceData`]. Nothing mutable is shared
//! between sessions.
//!
//! Input changes arrive as a [`Stimulus`]. All of its writes are applied in
//! one batch, so no memo or effect observes half of a stimulus, and the
//! effects are flushed once at the end.

mod manager;
mod worker;

pub use manager::{ServerFn, SessionManager};
pub use worker::SessionWorker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::ReferenceData;
use crate::error::{BoxError, ReactiveError, ReactiveResult};
use crate::reactive::{EffectFailure, Runtime, RuntimeConfig, Signal};
use crate::render::{Artifact, Output};
use crate::value::Value;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One change of one input widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputUpdate {
    pub name: String,
    pub value: Value,
}

/// One external event: every input change the client sent in one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub updates: Vec<InputUpdate>,
}

impl Stimulus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an update; builder style.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates.push(InputUpdate {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Outcome of processing one stimulus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StimulusReport {
    /// Inputs whose value actually changed, in stimulus order.
    pub changed_inputs: Vec<String>,
    /// Outputs the render layer should read again.
    pub stale_outputs: Vec<String>,
    /// Effects that failed while the stimulus was flushed.
    pub effect_failures: Vec<EffectFailure>,
}

/// The reactive graph of one client connection.
pub struct Session {
    id: SessionId,
    runtime: Runtime,
    inputs: RwLock<IndexMap<String, Signal<Value>>>,
    outputs: RwLock<IndexMap<String, Output>>,
    shared: Arc<ReferenceData>,
    /// Held for the whole of one stimulus, writes and flush alike.
    dispatching: Mutex<()>,
}

impl Session {
    pub fn new(config: RuntimeConfig, shared: Arc<ReferenceData>) -> Self {
        Self {
            id: SessionId::new(),
            runtime: Runtime::with_config(config),
            inputs: RwLock::new(IndexMap::new()),
            outputs: RwLock::new(IndexMap::new()),
            shared,
            dispatching: Mutex::new(()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Reference data shared with every other session.
    pub fn shared(&self) -> &Arc<ReferenceData> {
        &self.shared
    }

    pub fn is_active(&self) -> bool {
        self.runtime.is_active()
    }

    /// Declare an input, or return the existing one of that name.
    pub fn input(&self, name: &str, initial: impl Into<Value>) -> Signal<Value> {
        if let Some(signal) = self.inputs.read().get(name) {
            return signal.clone();
        }
        self.inputs
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| Signal::new(&self.runtime, initial.into()))
            .clone()
    }

    pub fn input_signal(&self, name: &str) -> ReactiveResult<Signal<Value>> {
        self.inputs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReactiveError::UnknownInput(name.to_owned()))
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.read().keys().cloned().collect()
    }

    /// Register an output. Its render function runs when the output is read.
    ///
    /// Registering a name twice replaces the earlier output and removes it
    /// from the graph.
    pub fn output<F>(&self, name: &str, render: F) -> ReactiveResult<Output>
    where
        F: Fn() -> Result<Artifact, BoxError> + Send + Sync + 'static,
    {
        self.runtime.ensure_active("register an output")?;
        let output = Output::new(&self.runtime, name, render);
        let replaced = self.outputs.write().insert(name.to_owned(), output.clone());
        if let Some(old) = replaced {
            tracing::debug!(session = %self.id, output = name, "replacing output");
            old.dispose();
        }
        Ok(output)
    }

    pub fn output_handle(&self, name: &str) -> ReactiveResult<Output> {
        self.outputs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReactiveError::UnknownOutput(name.to_owned()))
    }

    /// Apply one stimulus.
    ///
    /// Every write lands before any effect runs. Inputs the stimulus names but
    /// the session never declared are declared on the spot.
    ///
    /// Concurrent callers wait for each other, so each report covers exactly
    /// the effects its own stimulus triggered. Must not be called from inside
    /// a computation of the same session.
    pub fn dispatch(&self, stimulus: &Stimulus) -> ReactiveResult<StimulusReport> {
        let _turn = self.dispatching.lock();
        self.runtime.ensure_active("dispatch a stimulus")?;
        let span = tracing::debug_span!(
            "stimulus",
            session = %self.id,
            updates = stimulus.updates.len()
        );
        let _enter = span.enter();

        let (applied, effect_failures) = self.runtime.batch(|| self.apply(stimulus));
        let changed_inputs = applied?;

        let report = StimulusReport {
            changed_inputs,
            stale_outputs: self.stale_outputs(),
            effect_failures,
        };
        tracing::debug!(
            changed = report.changed_inputs.len(),
            stale = report.stale_outputs.len(),
            failures = report.effect_failures.len(),
            "stimulus processed"
        );
        Ok(report)
    }

    fn apply(&self, stimulus: &Stimulus) -> ReactiveResult<Vec<String>> {
        let mut changed: Vec<String> = Vec::new();
        for update in &stimulus.updates {
            let existing = self.inputs.read().get(&update.name).cloned();
            let moved = match existing {
                Some(signal) => {
                    let before = signal.version();
                    signal.set(update.value.clone())?;
                    signal.version() != before
                }
                None => {
                    tracing::debug!(input = %update.name, "declaring input from stimulus");
                    self.input(&update.name, update.value.clone());
                    true
                }
            };
            if moved && !changed.contains(&update.name) {
                changed.push(update.name.clone());
            }
        }
        Ok(changed)
    }

    /// Read an output, rendering a failed computation as [`Artifact::Error`].
    pub fn render(&self, name: &str) -> ReactiveResult<Artifact> {
        self.output_handle(name)?.render()
    }

    /// Outputs whose next read has to recompute or re-verify.
    pub fn stale_outputs(&self) -> Vec<String> {
        self.outputs
            .read()
            .iter()
            .filter(|(_, output)| output.is_stale())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// End the session. Later writes fail with `Lifecycle`.
    pub fn end(&self) {
        if self.runtime.is_active() {
            self.runtime.dispose();
            tracing::info!(session = %self.id, "session ended");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("inputs", &self.inputs.read().len())
            .field("outputs", &self.outputs.read().len())
            .finish()
    }
}
