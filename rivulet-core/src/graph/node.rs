//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//! A node only carries bookkeeping (dirty state, versions, edges); the typed
//! values and user functions live in the reactive handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

/// Unique identifier for a node in the dependency graph.
///
/// Ids are unique across the whole process, so nodes from different sessions
/// can never be confused with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (memo). These have dependencies and may have dependents.
    /// They cache their computed value and recompute lazily.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents; they may write signals.
    Effect,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. Something upstream changed,
    /// but a direct dependency's version may still be the one we saw.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct input has changed
    /// or the node has never run.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Bumped whenever the node's observable value changes.
    version: u64,

    /// Nodes this node read during its last run, in first-read order,
    /// paired with the version observed at that read.
    dependencies: IndexMap<NodeId, u64>,

    /// Nodes that read this node during their last run.
    dependents: IndexSet<NodeId>,

    /// Signals written during the last run (effects only).
    writes: SmallVec<[NodeId; 2]>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(NodeId::new(), kind)
    }

    /// Create a node for an id that was allocated up front.
    pub fn with_id(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derived => DirtyState::Dirty,
                NodeKind::Effect => DirtyState::Dirty,
            },
            version: 0,
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
            writes: SmallVec::new(),
        }
    }

    /// Create a new source (signal) node.
    #[cfg(test)]
    pub(crate) fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new derived (memo) node.
    #[cfg(test)]
    pub(crate) fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new effect node.
    #[cfg(test)]
    pub(crate) fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty (something upstream changed).
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record that the node's observable value changed.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Add a dependency, remembering the version that was observed.
    ///
    /// The first observation of a dependency wins, so the order and the
    /// snapshot reflect the first read made during a run.
    pub fn add_dependency(&mut self, node_id: NodeId, observed_version: u64) {
        self.dependencies.entry(node_id).or_insert(observed_version);
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// Dependencies with the version observed at last computation.
    pub fn dependencies(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.dependencies.iter().map(|(id, version)| (*id, *version))
    }

    pub fn has_dependency(&self, node_id: NodeId) -> bool {
        self.dependencies.contains_key(&node_id)
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Remove all dependencies, returning the ids that were removed.
    pub fn clear_dependencies(&mut self) -> Vec<NodeId> {
        self.dependencies.drain(..).map(|(id, _)| id).collect()
    }

    /// Signals written by this node during its last run.
    pub fn writes(&self) -> &[NodeId] {
        &self.writes
    }

    pub fn set_writes(&mut self, writes: SmallVec<[NodeId; 2]>) {
        self.writes = writes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source();
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert_eq!(node.version(), 0);
    }

    #[test]
    fn derived_and_effect_nodes_start_dirty() {
        assert_eq!(Node::derived().dirty_state(), DirtyState::Dirty);
        assert_eq!(Node::effect().dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn dependency_management_keeps_first_observation() {
        let mut node = Node::derived();
        let dep1 = NodeId::new();
        let dep2 = NodeId::new();

        node.add_dependency(dep1, 3);
        node.add_dependency(dep2, 7);
        node.add_dependency(dep1, 9);

        let deps: Vec<_> = node.dependencies().collect();
        assert_eq!(deps, vec![(dep1, 3), (dep2, 7)]);

        node.remove_dependency(dep1);
        assert!(!node.has_dependency(dep1));
        assert_eq!(node.dependency_count(), 1);
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = Node::derived();

        node.mark_clean();
        assert_eq!(node.dirty_state(), DirtyState::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // Maybe-dirty never downgrades a dirty node
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn version_bumps() {
        let mut node = Node::source();
        node.bump_version();
        node.bump_version();
        assert_eq!(node.version(), 2);
    }
}
