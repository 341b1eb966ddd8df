//! Node mutation request/response types.

use serde::{Deserialize, Serialize};

use coursegraph_core::edge::EdgeRecord;
use coursegraph_core::graph::{MutationOutcome, RemovalOutcome};
use coursegraph_core::node::{NodeKind, NodeRecord, NodeRef, NodeState};

/// Request to add a node.
#[derive(Debug, Clone, Deserialize)]
pub struct AddNodeRequest {
    pub kind: NodeKind,
    /// Opaque content; any JSON value.
    pub content: serde_json::Value,
}

/// Request to replace a node's content.
#[derive(Debug, Clone, Deserialize)]
pub struct MutateNodeRequest {
    /// The version the caller last read. A mismatch is a VERSION_CONFLICT.
    pub expected_version: u64,
    pub content: serde_json::Value,
}

/// Response after an accepted content mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MutateNodeResponse {
    pub node: NodeRef,
    pub state: NodeState,
    /// `false` when the new content hashes equal to the old one.
    pub content_changed: bool,
    /// Whether dependents are being re-verified in the background.
    pub propagation_enqueued: bool,
}

impl MutateNodeResponse {
    pub fn new(outcome: MutationOutcome, propagation_enqueued: bool) -> Self {
        MutateNodeResponse {
            node: outcome.node,
            state: outcome.state,
            content_changed: outcome.content_changed,
            propagation_enqueued,
        }
    }
}

/// Response after removing a node.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveNodeResponse {
    /// The tombstoned node at its final version.
    pub node: NodeRef,
    pub retired_edges: Vec<EdgeRecord>,
    /// Former dependents whose staleness is being propagated.
    pub dependents: Vec<NodeRef>,
}

impl From<RemovalOutcome> for RemoveNodeResponse {
    fn from(outcome: RemovalOutcome) -> Self {
        RemoveNodeResponse {
            node: outcome.node,
            retired_edges: outcome.retired,
            dependents: outcome.dependents,
        }
    }
}

/// Request to declare a Stale or Conflicted node fresh.
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub expected_version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverrideResponse {
    pub node: NodeRecord,
    /// `false` when the node was already Fresh.
    pub changed: bool,
}
