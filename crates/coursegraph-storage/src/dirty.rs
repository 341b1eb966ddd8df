//! Incremental persistence dirty detection.
//!
//! Compares the stamps recorded at the last flush with the current snapshot
//! to find which node and edge rows need writing. A node's stamp covers its
//! version, state, trigger, and tombstone flag, so state-only changes made
//! by propagation are persisted even though they never bump versions.

use std::collections::{BTreeSet, HashMap, HashSet};

use coursegraph_core::graph::CourseSnapshot;
use coursegraph_core::id::{EdgeId, NodeId};
use coursegraph_core::node::{NodeRecord, NodeState, UpstreamTrigger};

/// The persisted identity of a node row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStamp {
    pub version: u64,
    pub state: NodeState,
    pub trigger: Option<UpstreamTrigger>,
    pub tombstoned: bool,
}

impl NodeStamp {
    pub fn of(record: &NodeRecord) -> Self {
        NodeStamp {
            version: record.version,
            state: record.state,
            trigger: record.triggering_upstream,
            tombstoned: record.tombstoned,
        }
    }
}

/// What the store held after the last successful flush.
#[derive(Debug, Clone, Default)]
pub struct PersistedStamps {
    pub nodes: HashMap<NodeId, NodeStamp>,
    pub live_edges: HashSet<EdgeId>,
    pub retired_edges: HashSet<EdgeId>,
}

impl PersistedStamps {
    /// Stamps for a snapshot that has just been written in full.
    pub fn from_snapshot(snapshot: &CourseSnapshot) -> Self {
        PersistedStamps {
            nodes: snapshot
                .nodes
                .iter()
                .map(|r| (r.id, NodeStamp::of(r)))
                .collect(),
            live_edges: snapshot.edges.iter().map(|e| e.id).collect(),
            retired_edges: snapshot.retired.iter().map(|r| r.edge.id).collect(),
        }
    }
}

/// Rows that changed since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    /// Nodes with no persisted row yet.
    pub new: BTreeSet<NodeId>,
    /// Nodes whose stamp changed.
    pub modified: BTreeSet<NodeId>,
    /// Live edges with no persisted row yet.
    pub edges_added: BTreeSet<EdgeId>,
    /// Edges retired since the last flush.
    pub edges_retired: BTreeSet<EdgeId>,
}

impl DirtySet {
    /// Nodes whose rows must be upserted (new + modified).
    pub fn nodes_to_write(&self) -> BTreeSet<NodeId> {
        self.new.union(&self.modified).copied().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.edges_added.is_empty()
            && self.edges_retired.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.edges_added.len() + self.edges_retired.len()
    }
}

/// Computes the dirty set of `snapshot` against the stamps of the last flush.
pub fn compute_dirty_set(snapshot: &CourseSnapshot, previous: &PersistedStamps) -> DirtySet {
    let mut dirty = DirtySet::default();

    for record in &snapshot.nodes {
        match previous.nodes.get(&record.id) {
            None => {
                dirty.new.insert(record.id);
            }
            Some(stamp) if *stamp != NodeStamp::of(record) => {
                dirty.modified.insert(record.id);
            }
            Some(_) => {}
        }
    }

    for edge in &snapshot.edges {
        if !previous.live_edges.contains(&edge.id) {
            dirty.edges_added.insert(edge.id);
        }
    }
    for retired in &snapshot.retired {
        if !previous.retired_edges.contains(&retired.edge.id) {
            dirty.edges_retired.insert(retired.edge.id);
        }
    }

    dirty
}
