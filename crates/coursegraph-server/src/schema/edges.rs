//! Edge request/response types.

use serde::{Deserialize, Serialize};

use coursegraph_core::edge::{EdgeRecord, EdgeType};
use coursegraph_core::graph::EdgeOutcome;
use coursegraph_core::node::NodeRef;

/// Request to add a typed edge between two nodes.
#[derive(Debug, Clone, Deserialize)]
pub struct AddEdgeRequest {
    pub from: u32,
    pub to: u32,
    pub edge_type: EdgeType,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddEdgeResponse {
    pub edge: EdgeRecord,
    /// `false` when an identical edge already existed.
    pub created: bool,
    /// The dependent endpoint after its version bump, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bumped: Option<NodeRef>,
}

impl From<EdgeOutcome> for AddEdgeResponse {
    fn from(outcome: EdgeOutcome) -> Self {
        AddEdgeResponse {
            edge: outcome.edge,
            created: outcome.created,
            bumped: outcome.bumped,
        }
    }
}
