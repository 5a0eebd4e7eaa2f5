//! Update Scheduler
//!
//! The scheduler owns the dependency graph of one runtime and decides which
//! nodes a change touches and in which order effects must run.
//!
//! # Algorithm
//!
//! 1. When a source node changes, its direct dependents become `Dirty` and
//!    everything further downstream becomes `MaybeDirty` (breadth-first).
//! 2. Memos are never recomputed while marking. They are pulled on read and
//!    use the recorded dependency versions to decide whether to rerun.
//! 3. Effects touched by the change are ordered topologically, where an
//!    effect that writes a signal counts as upstream of everything reading
//!    that signal. Producers therefore run before consumers.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind};

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. Dependents of the removed
    /// node are marked dirty so they notice on their next run.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for (dep_id, _) in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
                dependent.mark_dirty();
            }
        }

        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`, and saw it
    /// at `observed_version`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId, observed_version: u64) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency, observed_version);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the dependency set discovered by the latest run of `node_id`.
    ///
    /// Edges to nodes that no longer exist are dropped.
    pub fn replace_dependencies(&mut self, node_id: NodeId, dependencies: IndexMap<NodeId, u64>) {
        let old = match self.nodes.get_mut(&node_id) {
            Some(node) => node.clear_dependencies(),
            None => return,
        };
        for dep_id in old {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(node_id);
            }
        }
        for (dep_id, version) in dependencies {
            if dep_id != node_id && self.nodes.contains_key(&dep_id) {
                self.add_edge(dep_id, node_id, version);
            }
        }
    }

    /// Replace the set of signals an effect wrote during its latest run.
    pub fn set_writes(&mut self, node_id: NodeId, writes: SmallVec<[NodeId; 2]>) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_writes(writes);
        }
    }

    /// Nodes that must be reconsidered after `node_id` changes: its readers,
    /// plus the signals it writes when it is an effect.
    fn successors(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.get(&node_id).into_iter().flat_map(|node| {
            node.dependents()
                .iter()
                .copied()
                .chain(node.writes().iter().copied())
        })
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Bumps the source's version and returns every affected node in
    /// topological order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let roots: Vec<NodeId> = match self.nodes.get_mut(&source_id) {
            Some(source) => {
                source.bump_version();
                source.dependents().iter().copied().collect()
            }
            None => return Vec::new(),
        };
        self.mark_downstream(roots)
    }

    /// Force `node_id` to recompute on its next read without changing any
    /// source. Returns the node and everything downstream of it.
    pub fn invalidate(&mut self, node_id: NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(&node_id) {
            return Vec::new();
        }
        self.mark_downstream(vec![node_id])
    }

    /// Roots become dirty, everything reachable from them maybe dirty.
    fn mark_downstream(&mut self, roots: Vec<NodeId>) -> Vec<NodeId> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<(NodeId, bool)> = roots.into_iter().map(|id| (id, true)).collect();

        // BFS: direct readers are dirty, everything further is maybe dirty
        while let Some((node_id, direct)) = queue.pop_front() {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                if direct {
                    node.mark_dirty();
                } else {
                    node.mark_maybe_dirty();
                }
                if !visited.insert(node_id) {
                    continue;
                }
                to_process.push(node_id);

                for dependent_id in node.dependents() {
                    queue.push_back((*dependent_id, false));
                }
            }
        }

        self.topological_sort(&to_process)
    }

    /// Whether `start`, or anything reachable from it through readers and
    /// effect writes, is in `targets`.
    pub fn reaches_any(&self, start: NodeId, targets: &HashSet<NodeId>) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node_id) = queue.pop_front() {
            if targets.contains(&node_id) {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            queue.extend(self.successors(node_id));
        }
        false
    }

    /// Order pending effects so that producers run before consumers.
    ///
    /// The ordering is computed over everything reachable from the pending
    /// effects, so an effect that feeds another through a signal and a chain
    /// of memos is still placed first. Effects the sort cannot place (which
    /// only happens on a cycle) keep their pending order at the end.
    pub fn effect_order(&self, pending: &IndexSet<NodeId>) -> Vec<NodeId> {
        let mut closure = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = pending.iter().copied().collect();

        while let Some(node_id) = queue.pop_front() {
            if !self.nodes.contains_key(&node_id) || !seen.insert(node_id) {
                continue;
            }
            closure.push(node_id);
            queue.extend(self.successors(node_id));
        }

        let mut ordered: Vec<NodeId> = self
            .topological_sort(&closure)
            .into_iter()
            .filter(|id| pending.contains(id))
            .collect();

        let placed: HashSet<NodeId> = ordered.iter().copied().collect();
        ordered.extend(
            pending
                .iter()
                .copied()
                .filter(|id| self.nodes.contains_key(id) && !placed.contains(id)),
        );
        ordered
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that producers come before the nodes that
    /// read them. Only edges within the given set are considered.
    fn topological_sort(&self, nodes: &[NodeId]) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = nodes.iter().map(|id| (*id, 0)).collect();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in nodes {
            for successor in self.successors(node_id) {
                if node_set.contains(&successor) {
                    if let Some(degree) = in_degree.get_mut(&successor) {
                        *degree += 1;
                    }
                }
            }
        }

        for &node_id in nodes {
            if in_degree.get(&node_id) == Some(&0) {
                queue.push_back(node_id);
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            for successor in self.successors(node_id) {
                if let Some(degree) = in_degree.get_mut(&successor) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 && node_set.contains(&successor) {
                        queue.push_back(successor);
                    }
                }
            }
        }

        result
    }

    /// Kind of a node, if it is still part of the graph.
    pub fn kind_of(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    /// Current version of a node, if it is still part of the graph.
    pub fn version_of(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
