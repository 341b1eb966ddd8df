//! Decompose a [`CourseSnapshot`] into flat storage rows and back.
//!
//! Both backends store the same row shapes: one row per node holding its
//! persisted stamp, one row per content payload keyed by hash, and one row
//! per edge (live or retired). Enums are stored as their wire names.

use std::collections::{BTreeMap, HashMap};

use coursegraph_core::edge::{EdgeRecord, EdgeType, RetiredEdge};
use coursegraph_core::graph::CourseSnapshot;
use coursegraph_core::hash::ContentHash;
use coursegraph_core::id::{EdgeId, NodeId};
use coursegraph_core::node::{Content, NodeKind, NodeRecord, NodeState, UpstreamTrigger};

use crate::error::StorageError;

/// Persisted per-node record. Content lives in the contents table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub node_id: u32,
    pub kind: String,
    pub version: u64,
    pub state: String,
    pub content_hash: String,
    pub trigger_node: Option<u32>,
    pub trigger_version: Option<u64>,
    pub updated_at_ms: u64,
    pub tombstoned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow {
    pub edge_id: u32,
    pub from_node: u32,
    pub to_node: u32,
    pub edge_type: String,
    pub retired_at_ms: Option<u64>,
}

/// A course split into rows.
#[derive(Debug, Clone, Default)]
pub struct DecomposedCourse {
    pub nodes: Vec<NodeRow>,
    /// Content bodies as JSON text, keyed by hex hash.
    pub contents: BTreeMap<String, String>,
    pub edges: Vec<EdgeRow>,
}

pub fn node_row(record: &NodeRecord) -> NodeRow {
    NodeRow {
        node_id: record.id.0,
        kind: record.kind.as_str().to_string(),
        version: record.version,
        state: record.state.as_str().to_string(),
        content_hash: record.content_hash.to_hex(),
        trigger_node: record.triggering_upstream.map(|t| t.node.0),
        trigger_version: record.triggering_upstream.map(|t| t.version),
        updated_at_ms: record.updated_at_ms,
        tombstoned: record.tombstoned,
    }
}

pub fn edge_row(edge: &EdgeRecord, retired_at_ms: Option<u64>) -> EdgeRow {
    EdgeRow {
        edge_id: edge.id.0,
        from_node: edge.from.0,
        to_node: edge.to.0,
        edge_type: edge.edge_type.as_str().to_string(),
        retired_at_ms,
    }
}

pub fn content_body(content: &Content) -> Result<String, StorageError> {
    Ok(serde_json::to_string(content)?)
}

/// Splits a snapshot into rows.
pub fn decompose(snapshot: &CourseSnapshot) -> Result<DecomposedCourse, StorageError> {
    let mut decomposed = DecomposedCourse::default();
    for record in &snapshot.nodes {
        decomposed
            .contents
            .insert(record.content_hash.to_hex(), content_body(&record.content)?);
        decomposed.nodes.push(node_row(record));
    }
    decomposed
        .edges
        .extend(snapshot.edges.iter().map(|e| edge_row(e, None)));
    decomposed.edges.extend(
        snapshot
            .retired
            .iter()
            .map(|r| edge_row(&r.edge, Some(r.retired_at_ms))),
    );
    Ok(decomposed)
}

fn integrity(reason: String) -> StorageError {
    StorageError::IntegrityError { reason }
}

/// Rebuilds a snapshot from rows. Does not check graph invariants; that is
/// `CourseGraph::from_snapshot`'s job.
pub fn recompose(decomposed: DecomposedCourse) -> Result<CourseSnapshot, StorageError> {
    let mut parsed_contents: HashMap<String, Content> = HashMap::new();
    for (hash, body) in &decomposed.contents {
        parsed_contents.insert(hash.clone(), serde_json::from_str(body)?);
    }

    let mut nodes = Vec::with_capacity(decomposed.nodes.len());
    for row in decomposed.nodes {
        let kind: NodeKind = row.kind.parse().map_err(integrity)?;
        let state: NodeState = row.state.parse().map_err(integrity)?;
        let content_hash = ContentHash::from_hex(&row.content_hash)
            .ok_or_else(|| integrity(format!("bad content hash on node {}", row.node_id)))?;
        let content = parsed_contents
            .get(&row.content_hash)
            .cloned()
            .ok_or_else(|| integrity(format!("missing content for node {}", row.node_id)))?;
        let triggering_upstream = match (row.trigger_node, row.trigger_version) {
            (Some(node), Some(version)) => Some(UpstreamTrigger {
                node: NodeId(node),
                version,
            }),
            _ => None,
        };
        nodes.push(NodeRecord {
            id: NodeId(row.node_id),
            kind,
            content,
            content_hash,
            version: row.version,
            state,
            triggering_upstream,
            updated_at_ms: row.updated_at_ms,
            tombstoned: row.tombstoned,
        });
    }
    nodes.sort_by_key(|n| n.id);

    let mut edges = Vec::new();
    let mut retired = Vec::new();
    for row in decomposed.edges {
        let edge_type: EdgeType = row.edge_type.parse().map_err(integrity)?;
        let edge = EdgeRecord {
            id: EdgeId(row.edge_id),
            from: NodeId(row.from_node),
            to: NodeId(row.to_node),
            edge_type,
        };
        match row.retired_at_ms {
            None => edges.push(edge),
            Some(retired_at_ms) => retired.push(RetiredEdge {
                edge,
                retired_at_ms,
            }),
        }
    }
    edges.sort_by_key(|e| e.id);
    retired.sort_by_key(|r| r.edge.id);

    Ok(CourseSnapshot {
        nodes,
        edges,
        retired,
    })
}
