//! Query request/response types.

use serde::{Deserialize, Serialize};

use coursegraph_core::graph::SubgraphDirection;
use coursegraph_core::impact::ProposedChange;
use coursegraph_core::node::{NodeRecord, NodeRef};

/// Default hop limit for subgraph queries.
pub const DEFAULT_SUBGRAPH_DEPTH: usize = 3;

/// Query string of `GET .../subgraph`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubgraphQuery {
    #[serde(default)]
    pub direction: SubgraphDirection,
    pub max_depth: Option<usize>,
}

/// Request to preview the blast radius of a change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImpactRequest {
    #[serde(default)]
    pub change: ProposedChange,
}

/// Live nodes awaiting regeneration or review.
#[derive(Debug, Clone, Serialize)]
pub struct StaleNodesResponse {
    pub nodes: Vec<NodeRecord>,
}

/// Nodes in prerequisite order.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceResponse {
    pub sequence: Vec<NodeRef>,
}

/// Response of a propagation flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    /// Rows written to the store by this flush.
    pub persisted: usize,
    pub pending: usize,
}
