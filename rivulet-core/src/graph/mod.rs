//! Dependency Graph
//!
//! This module implements the computational dependency graph that tracks
//! relationships between reactive values and computations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (memos, effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//! - Effects additionally carry "write" edges to the signals they set
//!
//! Each runtime (and therefore each session) owns exactly one graph. When a
//! signal changes, we traverse the graph to find all affected nodes and mark
//! them dirty. Memos then decide on read whether they really need to rerun by
//! comparing the versions they observed against the current ones.
//!
//! # Design Decisions
//!
//! 1. A centralized graph rather than per-node subscriber lists, so ordering
//!    and cycle detection see every edge at once.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. Both forward (dependencies) and reverse (dependents) edges are kept
//!    to allow traversal in both directions.

mod node;
mod scheduler;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
