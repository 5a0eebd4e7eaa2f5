//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal or memo is read,
//! we record it as a dependency of the computation on top of the stack.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When a runtime runs a memo or effect, it pushes an entry; the guard pops it
//! on every exit path, including panics. Entries are tagged with their
//! runtime, so a read that crosses sessions is never recorded as a dependency.
//!
//! Nested contexts are supported (a memo that reads another memo pushes a
//! second entry while the first one is still running).

use std::cell::RefCell;
use std::collections::HashSet;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::runtime::RuntimeId;
use crate::graph::{NodeId, NodeKind};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    runtime: RuntimeId,
    node: NodeId,
    kind: NodeKind,
    /// Depth of `untrack` calls active for this entry.
    suspended: usize,
    /// Nodes read during this run with the version seen at the read.
    dependencies: IndexMap<NodeId, u64>,
    /// Signals written during this run.
    writes: SmallVec<[NodeId; 2]>,
}

/// What a single run observed.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub dependencies: IndexMap<NodeId, u64>,
    pub writes: SmallVec<[NodeId; 2]>,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    node: NodeId,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for `node` of `runtime`.
    ///
    /// The context is exited by [`ReactiveContext::finish`] or when the guard
    /// is dropped.
    pub(crate) fn enter(runtime: RuntimeId, node: NodeId, kind: NodeKind) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                runtime,
                node,
                kind,
                suspended: 0,
                dependencies: IndexMap::new(),
                writes: SmallVec::new(),
            });
        });

        Self {
            node,
            finished: false,
        }
    }

    /// Exit the context and return what the run observed.
    pub(crate) fn finish(mut self) -> Frame {
        self.finished = true;
        CONTEXT_STACK.with(|stack| match stack.borrow_mut().pop() {
            Some(entry) => {
                debug_assert_eq!(
                    entry.node, self.node,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.node, entry.node
                );
                Frame {
                    dependencies: entry.dependencies,
                    writes: entry.writes,
                }
            }
            None => Frame::default(),
        })
    }

    /// Check if there is an active reactive context.
    pub(crate) fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost computation of `runtime` that is currently running.
    pub(crate) fn current(runtime: RuntimeId) -> Option<(NodeId, NodeKind)> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|entry| entry.runtime == runtime)
                .map(|entry| (entry.node, entry.kind))
        })
    }

    /// Whether `node` of `runtime` is anywhere on the evaluation stack.
    pub(crate) fn is_evaluating(runtime: RuntimeId, node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.runtime == runtime && entry.node == node)
        })
    }

    /// Record a read of `node` at `version`.
    ///
    /// Only the top entry records, and only while it is not inside `untrack`
    /// and belongs to the same runtime.
    pub(crate) fn track_dependency(runtime: RuntimeId, node: NodeId, version: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.runtime == runtime && entry.suspended == 0 && entry.node != node {
                    entry.dependencies.entry(node).or_insert(version);
                }
            }
        });
    }

    /// Record that the innermost computation of `runtime` wrote `signal`.
    pub(crate) fn record_write(runtime: RuntimeId, signal: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack
                .borrow_mut()
                .iter_mut()
                .rev()
                .find(|entry| entry.runtime == runtime)
            {
                if !entry.writes.contains(&signal) {
                    entry.writes.push(signal);
                }
            }
        });
    }

    /// Nodes read so far by the innermost computation of `runtime`.
    pub(crate) fn current_reads(runtime: RuntimeId) -> HashSet<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|entry| entry.runtime == runtime)
                .map(|entry| entry.dependencies.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    /// Get the dependencies collected in the current context.
    #[cfg(test)]
    pub(crate) fn get_dependencies() -> Vec<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.keys().copied().collect())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Resumes tracking for the top entry when dropped.
struct Untracked {
    active: bool,
}

impl Drop for Untracked {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                entry.suspended = entry.suspended.saturating_sub(1);
            }
        });
    }
}

/// Run `f` without registering any of its reads as dependencies of the
/// running computation.
///
/// Reads still observe the latest values. Memos evaluated inside `f` track
/// their own dependencies as usual.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let active = CONTEXT_STACK.with(|stack| match stack.borrow_mut().last_mut() {
        Some(entry) => {
            entry.suspended += 1;
            true
        }
        None => false,
    });
    let _guard = Untracked { active };
    f()
}
