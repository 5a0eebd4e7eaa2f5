//! Error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::NodeId;

/// Error type returned by user-supplied recompute, effect and render functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type ReactiveResult<T> = std::result::Result<T, ReactiveError>;

/// Errors raised by the reactive graph and the session layer.
///
/// `Clone` so a memoized failure can be handed to every reader.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// The owning runtime was disposed, or the session has ended.
    #[error("session is not active: cannot {operation}")]
    Lifecycle { operation: &'static str },

    /// A memo tried to write a signal while recomputing.
    #[error("node {node} attempted to write signal {signal} while recomputing")]
    ReentrantMutation { node: NodeId, signal: NodeId },

    /// The dependency graph would contain a cycle through `node`.
    #[error("dependency cycle detected at node {node}")]
    CyclicDependency { node: NodeId },

    /// The user-supplied function of `node` failed.
    #[error("recompute of node {node} failed: {message}")]
    Recompute { node: NodeId, message: String },

    #[error("unknown input `{0}`")]
    UnknownInput(String),

    #[error("unknown output `{0}`")]
    UnknownOutput(String),

    #[error("expected a {expected} value, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("session limit of {0} reached")]
    SessionLimit(usize),
}

impl ReactiveError {
    pub(crate) fn lifecycle(operation: &'static str) -> Self {
        Self::Lifecycle { operation }
    }

    /// Errors produced by the graph machinery itself. These cross node
    /// boundaries unchanged instead of being wrapped as `Recompute`.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::Lifecycle { .. }
                | Self::ReentrantMutation { .. }
                | Self::CyclicDependency { .. }
                | Self::Recompute { .. }
        )
    }

    /// Convert the error of a user function running as `node`.
    pub(crate) fn from_compute(node: NodeId, error: BoxError) -> Self {
        match error.downcast::<ReactiveError>() {
            Ok(inner) if inner.is_graph_error() => *inner,
            Ok(inner) => Self::Recompute {
                node,
                message: inner.to_string(),
            },
            Err(other) => Self::Recompute {
                node,
                message: other.to_string(),
            },
        }
    }
}

/// Fatal errors while loading configuration or reference data at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("dataset `{name}` is invalid: {reason}")]
    InvalidDataset { name: String, reason: String },
}

/// Errors from table operations on reference data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    #[error("row has {found} cells, table has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    #[error("column `{column}` holds non-numeric value {value}")]
    NotNumeric { column: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_errors_pass_through_unwrapped() {
        let origin = NodeId::new();
        let reader = NodeId::new();
        let boxed: BoxError = Box::new(ReactiveError::CyclicDependency { node: origin });

        assert_eq!(
            ReactiveError::from_compute(reader, boxed),
            ReactiveError::CyclicDependency { node: origin }
        );
    }

    #[test]
    fn other_errors_become_recompute() {
        let node = NodeId::new();
        let boxed: BoxError = "division by zero".into();
        assert_eq!(
            ReactiveError::from_compute(node, boxed),
            ReactiveError::Recompute {
                node,
                message: "division by zero".to_string()
            }
        );

        let mismatch: BoxError = Box::new(ReactiveError::TypeMismatch {
            expected: "int",
            found: "string",
        });
        assert!(matches!(
            ReactiveError::from_compute(node, mismatch),
            ReactiveError::Recompute { .. }
        ));
    }
}
