//! Read-only blast-radius preview.
//!
//! Runs the propagation traversal without touching node state so a caller
//! can decide between updating only, marking stale, or cascading a
//! regeneration before committing a change.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::edge::EdgeType;
use crate::error::GraphError;
use crate::graph::{CourseGraph, SubgraphDirection};
use crate::id::NodeId;
use crate::node::{NodeRef, NodeState};

/// The kind of change being previewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposedChange {
    /// Replacing the node's content.
    #[default]
    ContentEdit,
    /// Removing the node and retiring its edges.
    Removal,
}

/// A node the change would reach, with its hop distance from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactEntry {
    pub node: NodeRef,
    pub depth: usize,
    pub state: NodeState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub node: NodeRef,
    pub change: ProposedChange,
    /// Content blocks (or objectives) that align directly to the node.
    pub direct_aligned: Vec<NodeRef>,
    /// Assessment items that assess the node directly.
    pub direct_assessed: Vec<NodeRef>,
    /// Every node the change would mark stale, direct ones included.
    pub transitive_count: usize,
    pub affected: Vec<ImpactEntry>,
    /// Nodes that list this one as a prerequisite. Informational: ordering
    /// edges never carry staleness.
    pub prerequisite_dependents: Vec<NodeRef>,
    /// Live edges a removal would retire. Zero for content edits.
    pub retired_edges: usize,
}

/// Previews the effect of changing `id` without mutating anything.
pub fn preview_impact(
    graph: &CourseGraph,
    id: NodeId,
    change: ProposedChange,
) -> Result<ImpactReport, GraphError> {
    let node = graph.node_ref(id)?;
    let incoming = graph.edges_of(id, SubgraphDirection::Incoming);

    let refs_for = |edge_type: EdgeType| -> Vec<NodeRef> {
        let mut refs: Vec<NodeRef> = incoming
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .filter_map(|e| graph.node_ref(e.from).ok())
            .collect();
        refs.sort_by_key(|n| n.id);
        refs
    };
    let direct_aligned = refs_for(EdgeType::AlignsTo);
    let direct_assessed = refs_for(EdgeType::Assesses);

    let mut prerequisite_dependents: Vec<NodeRef> = graph
        .edges_of(id, SubgraphDirection::Outgoing)
        .into_iter()
        .filter(|e| e.edge_type == EdgeType::PrerequisiteFor)
        .filter_map(|e| graph.node_ref(e.to).ok())
        .collect();
    prerequisite_dependents.sort_by_key(|n| n.id);

    let affected = reachable(graph, id);
    let retired_edges = match change {
        ProposedChange::ContentEdit => 0,
        ProposedChange::Removal => graph.edges_of(id, SubgraphDirection::Both).len(),
    };

    Ok(ImpactReport {
        node,
        change,
        direct_aligned,
        direct_assessed,
        transitive_count: affected.len(),
        affected,
        prerequisite_dependents,
        retired_edges,
    })
}

/// Every node reachable from `origin` against stale-producing edges, in BFS
/// order. Unlike propagation, already-stale nodes are walked through.
fn reachable(graph: &CourseGraph, origin: NodeId) -> Vec<ImpactEntry> {
    let mut visited = HashSet::from([origin]);
    let mut queue = VecDeque::from([(origin, 0usize)]);
    let mut out = Vec::new();

    while let Some((id, depth)) = queue.pop_front() {
        for next in graph.stale_dependents(id) {
            if !visited.insert(next) {
                continue;
            }
            if let Ok(record) = graph.get_node(next) {
                out.push(ImpactEntry {
                    node: record.node_ref(),
                    depth: depth + 1,
                    state: record.state,
                });
                queue.push_back((next, depth + 1));
            }
        }
    }
    out
}
