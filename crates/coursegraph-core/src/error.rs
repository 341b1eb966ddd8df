//! Core error types for coursegraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering every
//! rejection the graph store can produce. Structural rejections (cycle,
//! illegal edge) are raised before anything is applied, so a returned error
//! always means the graph is unchanged.

use thiserror::Error;

use crate::edge::EdgeType;
use crate::id::NodeId;
use crate::node::{NodeKind, NodeState};

/// Errors produced by the course graph store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The node does not exist or has been tombstoned.
    #[error("node not found: NodeId({id})")]
    NodeNotFound { id: NodeId },

    /// Adding the edge would create a path from `to` back to `from`.
    #[error("edge {from} -> {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    /// The endpoint kinds violate the edge type's legality constraint.
    #[error("illegal {edge_type} edge: {from_kind} -> {to_kind}")]
    IllegalEdgeType {
        edge_type: EdgeType,
        from_kind: NodeKind,
        to_kind: NodeKind,
    },

    /// The caller's expected version is not the stored version.
    #[error("version conflict on NodeId({id}): expected {expected}, found {actual}")]
    VersionConflict {
        id: NodeId,
        expected: u64,
        actual: u64,
    },

    /// The node is not in a state that permits the requested transition.
    #[error("NodeId({id}) is {state}, cannot {action}")]
    InvalidState {
        id: NodeId,
        state: NodeState,
        action: &'static str,
    },

    /// The node was marked Conflicted while a regeneration was in flight.
    #[error("NodeId({id}) was superseded by an upstream change during regeneration")]
    Conflicted { id: NodeId },

    /// A snapshot could not be turned back into a consistent graph.
    #[error("inconsistent snapshot: {reason}")]
    InconsistentSnapshot { reason: String },
}
