//! The course graph store: the single owner of node and edge state.
//!
//! Topology (node kinds and typed edges) is a petgraph `StableGraph` behind a
//! `RwLock`; node records live in a `DashMap` so that content edits of
//! unrelated nodes never contend. Any path that needs both takes the topology
//! lock first and a record entry second, never the other way round.
//!
//! Every structural check (legality, cycle, version) happens before anything
//! is written, so an `Err` always leaves the graph unchanged.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::edge::{EdgeRecord, EdgeType, RetiredEdge};
use crate::error::GraphError;
use crate::hash::{hash_content, hash_upstream, ContentHash};
use crate::id::{EdgeId, NodeId};
use crate::node::{
    now_ms, Content, NodeKind, NodeRecord, NodeRef, NodeState, NodeStateEvent, UpstreamTrigger,
};

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// Which edges a subgraph walk follows from each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgraphDirection {
    /// Follow edges from `from` to `to`.
    #[default]
    Outgoing,
    /// Follow edges from `to` back to `from`.
    Incoming,
    Both,
}

/// Nodes and live edges reached by [`CourseGraph::get_subgraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: NodeId,
    /// Reached nodes in BFS order, root first.
    pub nodes: Vec<NodeRef>,
    /// Traversed edges, ordered by id.
    pub edges: Vec<EdgeRecord>,
}

/// Result of an accepted `add_edge`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeOutcome {
    pub edge: EdgeRecord,
    /// `false` when an identical edge already existed.
    pub created: bool,
    /// The dependent endpoint after its version bump, when the edge type is
    /// version-relevant and the edge is new.
    pub bumped: Option<NodeRef>,
}

/// Result of an accepted `mutate_node`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub node: NodeRef,
    pub state: NodeState,
    /// `false` when the new content hashes equal to the old one.
    pub content_changed: bool,
}

/// Result of an accepted `remove_node`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalOutcome {
    /// The tombstoned node at its final version.
    pub node: NodeRef,
    pub retired: Vec<EdgeRecord>,
    /// Former direct dependents, version-bumped because a version-relevant
    /// edge to them was retired. These seed the removal's propagation.
    pub dependents: Vec<NodeRef>,
}

/// What a propagation step did to a reached node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked(NodeStateEvent),
    Conflicted(NodeStateEvent),
    /// Already carries an equal-or-newer trigger from the same origin.
    AlreadyMarked,
    /// Tombstoned or unknown.
    Missing,
}

/// Snapshot of a node taken when a regeneration starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationTicket {
    pub node: NodeRef,
    pub prior_state: NodeState,
    pub prior_trigger: Option<UpstreamTrigger>,
    pub event: NodeStateEvent,
}

/// A complete, serializable picture of one course graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseSnapshot {
    /// Every node ever created, tombstones included, ordered by id.
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    #[serde(default)]
    pub retired: Vec<RetiredEdge>,
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct EdgeWeight {
    id: EdgeId,
    edge_type: EdgeType,
}

#[derive(Debug, Default)]
struct Topology {
    graph: StableGraph<NodeKind, EdgeWeight, Directed, u32>,
    next_edge_id: u32,
    retired: Vec<RetiredEdge>,
}

impl Topology {
    fn contains(&self, id: NodeId) -> bool {
        self.graph.contains_node(id.into())
    }

    fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.graph.node_weight(id.into()).copied()
    }

    fn edges_of(&self, id: NodeId, direction: SubgraphDirection) -> Vec<EdgeRecord> {
        let idx: NodeIndex<u32> = id.into();
        let mut out = Vec::new();
        if matches!(direction, SubgraphDirection::Outgoing | SubgraphDirection::Both) {
            out.extend(
                self.graph
                    .edges_directed(idx, petgraph::Direction::Outgoing)
                    .map(|e| to_record(e.source(), e.target(), e.weight())),
            );
        }
        if matches!(direction, SubgraphDirection::Incoming | SubgraphDirection::Both) {
            out.extend(
                self.graph
                    .edges_directed(idx, petgraph::Direction::Incoming)
                    .map(|e| to_record(e.source(), e.target(), e.weight())),
            );
        }
        out
    }

    fn find_edge(&self, from: NodeId, to: NodeId, edge_type: EdgeType) -> Option<EdgeRecord> {
        self.graph
            .edges_directed(from.into(), petgraph::Direction::Outgoing)
            .find(|e| NodeId::from(e.target()) == to && e.weight().edge_type == edge_type)
            .map(|e| to_record(e.source(), e.target(), e.weight()))
    }

    fn insert_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        edge_type: EdgeType,
        id: EdgeId,
    ) -> EdgeRecord {
        self.graph.add_edge(from.into(), to.into(), EdgeWeight { id, edge_type });
        self.next_edge_id = self.next_edge_id.max(id.0 + 1);
        EdgeRecord {
            id,
            from,
            to,
            edge_type,
        }
    }

    fn live_edges(&self) -> Vec<EdgeRecord> {
        let mut edges: Vec<EdgeRecord> = self
            .graph
            .edge_indices()
            .filter_map(|idx| {
                let (source, target) = self.graph.edge_endpoints(idx)?;
                let weight = self.graph.edge_weight(idx)?;
                Some(to_record(source, target, weight))
            })
            .collect();
        edges.sort_by_key(|e| e.id);
        edges
    }
}

fn to_record(source: NodeIndex<u32>, target: NodeIndex<u32>, weight: &EdgeWeight) -> EdgeRecord {
    EdgeRecord {
        id: weight.id,
        from: source.into(),
        to: target.into(),
        edge_type: weight.edge_type,
    }
}

// ---------------------------------------------------------------------------
// CourseGraph
// ---------------------------------------------------------------------------

/// Arena of course nodes and typed edges.
///
/// All methods take `&self`; the store is shared behind an `Arc` by the
/// propagation workers, the regeneration coordinator, and request handlers.
#[derive(Debug, Default)]
pub struct CourseGraph {
    topology: RwLock<Topology>,
    records: DashMap<NodeId, NodeRecord>,
}

impl CourseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_topology(&self) -> RwLockReadGuard<'_, Topology> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topology(&self) -> RwLockWriteGuard<'_, Topology> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kind of a live node.
    fn live_kind(&self, topo: &Topology, id: NodeId) -> Result<NodeKind, GraphError> {
        let kind = topo.kind(id).ok_or(GraphError::NodeNotFound { id })?;
        match self.records.get(&id) {
            Some(record) if !record.tombstoned => Ok(kind),
            _ => Err(GraphError::NodeNotFound { id }),
        }
    }

    // -- Mutations -----------------------------------------------------------

    /// Creates a node in `Fresh` state at version 0.
    pub fn add_node(&self, kind: NodeKind, content: Content) -> NodeRef {
        let mut topo = self.write_topology();
        let id = NodeId::from(topo.graph.add_node(kind));
        let record = NodeRecord::new(id, kind, content);
        let node = record.node_ref();
        self.records.insert(id, record);
        drop(topo);

        tracing::info!(node = %id, %kind, "node added");
        node
    }

    /// Adds a typed edge after checking endpoint legality and acyclicity.
    ///
    /// Re-adding an existing `(from, to, type)` edge returns it unchanged.
    pub fn add_edge(
        &self,
        from: NodeId,
        to: NodeId,
        edge_type: EdgeType,
    ) -> Result<EdgeOutcome, GraphError> {
        let mut topo = self.write_topology();
        let from_kind = self.live_kind(&topo, from)?;
        let to_kind = self.live_kind(&topo, to)?;

        if !edge_type.legal_endpoints(from_kind, to_kind) {
            return Err(GraphError::IllegalEdgeType {
                edge_type,
                from_kind,
                to_kind,
            });
        }

        if let Some(existing) = topo.find_edge(from, to, edge_type) {
            return Ok(EdgeOutcome {
                edge: existing,
                created: false,
                bumped: None,
            });
        }

        // A path to -> from plus the new edge from -> to would close a cycle.
        // Covers the self-loop case, since every node reaches itself.
        if has_path_connecting(&topo.graph, to.into(), from.into(), None) {
            return Err(GraphError::Cycle { from, to });
        }

        let id = EdgeId(topo.next_edge_id);
        let edge = topo.insert_edge(from, to, edge_type, id);

        let bumped = if edge_type.is_version_relevant() {
            self.records.get_mut(&from).map(|mut record| {
                record.bump();
                record.node_ref()
            })
        } else {
            None
        };
        drop(topo);

        tracing::info!(edge = %id, %from, %to, %edge_type, "edge added");
        Ok(EdgeOutcome {
            edge,
            created: true,
            bumped,
        })
    }

    /// Replaces a node's content under optimistic concurrency.
    ///
    /// The node's state is left as it is: a caller edit does not clear
    /// staleness, and an edit during regeneration is caught when the
    /// regeneration tries to apply.
    pub fn mutate_node(
        &self,
        id: NodeId,
        expected_version: u64,
        content: Content,
    ) -> Result<MutationOutcome, GraphError> {
        let mut record = self
            .records
            .get_mut(&id)
            .filter(|r| !r.tombstoned)
            .ok_or(GraphError::NodeNotFound { id })?;

        if record.version != expected_version {
            return Err(GraphError::VersionConflict {
                id,
                expected: expected_version,
                actual: record.version,
            });
        }

        let content_changed = hash_content(&content) != record.content_hash;
        record.replace_content(content);
        let outcome = MutationOutcome {
            node: record.node_ref(),
            state: record.state,
            content_changed,
        };
        drop(record);

        tracing::info!(node = %id, version = outcome.node.version, content_changed, "node mutated");
        Ok(outcome)
    }

    /// Tombstones a node and retires every incident edge.
    pub fn remove_node(&self, id: NodeId) -> Result<RemovalOutcome, GraphError> {
        let mut topo = self.write_topology();
        self.live_kind(&topo, id)?;

        let mut incident = topo.edges_of(id, SubgraphDirection::Both);
        incident.sort_by_key(|e| e.id);
        let retired_at_ms = now_ms();
        let idx: NodeIndex<u32> = id.into();
        let edge_indices: Vec<_> = topo
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .chain(topo.graph.edges_directed(idx, petgraph::Direction::Incoming))
            .map(|e| e.id())
            .collect();
        for edge_idx in edge_indices {
            topo.graph.remove_edge(edge_idx);
        }
        topo.retired
            .extend(incident.iter().map(|&edge| RetiredEdge { edge, retired_at_ms }));

        let mut dependents = Vec::new();
        for edge in incident.iter().filter(|e| e.to == id && e.edge_type.is_version_relevant()) {
            if let Some(mut record) = self.records.get_mut(&edge.from) {
                record.bump();
                dependents.push(record.node_ref());
            }
        }
        dependents.sort_by_key(|n| n.id);

        let node = match self.records.get_mut(&id) {
            Some(mut record) => {
                record.tombstoned = true;
                record.bump();
                record.node_ref()
            }
            None => return Err(GraphError::NodeNotFound { id }),
        };
        drop(topo);

        tracing::info!(
            node = %id,
            retired = incident.len(),
            dependents = dependents.len(),
            "node removed"
        );
        Ok(RemovalOutcome {
            node,
            retired: incident,
            dependents,
        })
    }

    /// Explicit caller override: declares a Stale or Conflicted node fresh.
    ///
    /// Returns `None` when the node is already Fresh.
    pub fn override_state(
        &self,
        id: NodeId,
        expected_version: u64,
    ) -> Result<Option<NodeStateEvent>, GraphError> {
        let mut record = self
            .records
            .get_mut(&id)
            .filter(|r| !r.tombstoned)
            .ok_or(GraphError::NodeNotFound { id })?;

        if record.version != expected_version {
            return Err(GraphError::VersionConflict {
                id,
                expected: expected_version,
                actual: record.version,
            });
        }
        match record.state {
            NodeState::Fresh => Ok(None),
            NodeState::Regenerating => Err(GraphError::InvalidState {
                id,
                state: record.state,
                action: "override",
            }),
            NodeState::Stale | NodeState::Conflicted => {
                let event = transition(&mut record, NodeState::Fresh, None);
                tracing::info!(node = %id, version = record.version, "staleness overridden");
                Ok(Some(event))
            }
        }
    }

    // -- Propagation primitives ---------------------------------------------

    /// Nodes whose correctness depends on `id`: sources of its incoming
    /// stale-producing edges, ordered by id.
    pub fn stale_dependents(&self, id: NodeId) -> Vec<NodeId> {
        let topo = self.read_topology();
        if !topo.contains(id) {
            return Vec::new();
        }
        let mut out: Vec<NodeId> = topo
            .edges_of(id, SubgraphDirection::Incoming)
            .into_iter()
            .filter(|e| e.edge_type.is_stale_producing())
            .map(|e| e.from)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Marks a node stale because of `trigger`.
    ///
    /// A node that already records a trigger from the same upstream at an
    /// equal-or-newer version is left alone, including a Regenerating node
    /// whose attempt started after that trigger. Otherwise a Regenerating
    /// node becomes Conflicted instead of Stale.
    pub fn mark_stale(&self, id: NodeId, trigger: UpstreamTrigger) -> MarkOutcome {
        let Some(mut record) = self.records.get_mut(&id).filter(|r| !r.tombstoned) else {
            return MarkOutcome::Missing;
        };

        let already = (record.state.is_unverified() || record.state == NodeState::Regenerating)
            && record
                .triggering_upstream
                .is_some_and(|t| t.node == trigger.node && t.version >= trigger.version);
        if already {
            return MarkOutcome::AlreadyMarked;
        }

        if record.state == NodeState::Regenerating {
            MarkOutcome::Conflicted(transition(&mut record, NodeState::Conflicted, Some(trigger)))
        } else {
            MarkOutcome::Marked(transition(&mut record, NodeState::Stale, Some(trigger)))
        }
    }

    // -- Regeneration primitives --------------------------------------------

    /// Moves a node to `Regenerating`, remembering the state to restore if
    /// the attempt fails.
    pub fn begin_regeneration(&self, id: NodeId) -> Result<RegenerationTicket, GraphError> {
        let mut record = self
            .records
            .get_mut(&id)
            .filter(|r| !r.tombstoned)
            .ok_or(GraphError::NodeNotFound { id })?;

        if record.state == NodeState::Regenerating {
            return Err(GraphError::InvalidState {
                id,
                state: record.state,
                action: "begin regeneration",
            });
        }

        // A leftover Conflicted mark restores as Stale.
        let prior_state = match record.state {
            NodeState::Conflicted => NodeState::Stale,
            other => other,
        };
        let prior_trigger = record.triggering_upstream;
        let event = transition(&mut record, NodeState::Regenerating, prior_trigger);
        Ok(RegenerationTicket {
            node: record.node_ref(),
            prior_state,
            prior_trigger,
            event,
        })
    }

    /// Applies generated content if the node is still Regenerating at the
    /// version observed when the lease was taken.
    pub fn finish_regeneration(
        &self,
        id: NodeId,
        expected_version: u64,
        content: Content,
    ) -> Result<(NodeRef, NodeStateEvent), GraphError> {
        let mut record = self
            .records
            .get_mut(&id)
            .filter(|r| !r.tombstoned)
            .ok_or(GraphError::NodeNotFound { id })?;

        if record.state == NodeState::Conflicted {
            return Err(GraphError::Conflicted { id });
        }
        if record.version != expected_version {
            return Err(GraphError::VersionConflict {
                id,
                expected: expected_version,
                actual: record.version,
            });
        }
        if record.state != NodeState::Regenerating {
            return Err(GraphError::InvalidState {
                id,
                state: record.state,
                action: "apply regeneration",
            });
        }

        record.replace_content(content);
        let event = transition(&mut record, NodeState::Fresh, None);
        Ok((record.node_ref(), event))
    }

    /// Restores the pre-regeneration state after a failed or timed-out
    /// attempt. A node that turned Conflicted meanwhile becomes Stale with
    /// its newer trigger.
    pub fn abort_regeneration(&self, ticket: &RegenerationTicket) -> Option<NodeStateEvent> {
        let mut record = self.records.get_mut(&ticket.node.id).filter(|r| !r.tombstoned)?;
        match record.state {
            NodeState::Regenerating => Some(transition(
                &mut record,
                ticket.prior_state,
                ticket.prior_trigger,
            )),
            NodeState::Conflicted => {
                let trigger = record.triggering_upstream;
                Some(transition(&mut record, NodeState::Stale, trigger))
            }
            _ => None,
        }
    }

    /// Leaves an interrupted regeneration as Stale: used for superseded
    /// results and expired leases.
    pub fn revert_to_stale(&self, id: NodeId) -> Option<NodeStateEvent> {
        let mut record = self.records.get_mut(&id).filter(|r| !r.tombstoned)?;
        match record.state {
            NodeState::Regenerating | NodeState::Conflicted => {
                let trigger = record.triggering_upstream;
                Some(transition(&mut record, NodeState::Stale, trigger))
            }
            _ => None,
        }
    }

    // -- Queries -------------------------------------------------------------

    /// Full record of a live node.
    pub fn get_node(&self, id: NodeId) -> Result<NodeRecord, GraphError> {
        self.records
            .get(&id)
            .filter(|r| !r.tombstoned)
            .map(|r| r.clone())
            .ok_or(GraphError::NodeNotFound { id })
    }

    /// Reads a live record in place, without cloning its content.
    pub fn with_node<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&NodeRecord) -> R,
    ) -> Result<R, GraphError> {
        self.records
            .get(&id)
            .filter(|r| !r.tombstoned)
            .map(|r| f(&r))
            .ok_or(GraphError::NodeNotFound { id })
    }

    pub fn node_ref(&self, id: NodeId) -> Result<NodeRef, GraphError> {
        self.records
            .get(&id)
            .filter(|r| !r.tombstoned)
            .map(|r| r.node_ref())
            .ok_or(GraphError::NodeNotFound { id })
    }

    /// Live node records ordered by id.
    pub fn list_nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self
            .records
            .iter()
            .filter(|r| !r.tombstoned)
            .map(|r| r.clone())
            .collect();
        nodes.sort_by_key(|r| r.id);
        nodes
    }

    /// Live nodes that are Stale or Conflicted, ordered by id.
    pub fn stale_nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self
            .records
            .iter()
            .filter(|r| !r.tombstoned && r.state.is_unverified())
            .map(|r| r.clone())
            .collect();
        nodes.sort_by_key(|r| r.id);
        nodes
    }

    /// Live edges touching `id` in the given direction.
    pub fn edges_of(&self, id: NodeId, direction: SubgraphDirection) -> Vec<EdgeRecord> {
        let topo = self.read_topology();
        if !topo.contains(id) {
            return Vec::new();
        }
        topo.edges_of(id, direction)
    }

    pub fn edges(&self) -> Vec<EdgeRecord> {
        self.read_topology().live_edges()
    }

    /// Retired edges ordered by id.
    pub fn retired_edges(&self) -> Vec<RetiredEdge> {
        let mut retired = self.read_topology().retired.clone();
        retired.sort_by_key(|r| r.edge.id);
        retired
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.records.iter().filter(|r| !r.tombstoned).count()
    }

    pub fn edge_count(&self) -> usize {
        self.read_topology().graph.edge_count()
    }

    /// Returns `true` if the live edge set has no directed cycle.
    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.read_topology().graph)
    }

    /// Breadth-first walk from `root`, up to `max_depth` hops.
    pub fn get_subgraph(
        &self,
        root: NodeId,
        direction: SubgraphDirection,
        max_depth: usize,
    ) -> Result<Subgraph, GraphError> {
        let topo = self.read_topology();
        self.live_kind(&topo, root)?;

        let mut seen = HashSet::from([root]);
        let mut order = vec![root];
        let mut edges = BTreeMap::new();
        let mut frontier = VecDeque::from([(root, 0usize)]);

        while let Some((id, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in topo.edges_of(id, direction) {
                let next = if edge.from == id { edge.to } else { edge.from };
                edges.insert(edge.id, edge);
                if seen.insert(next) {
                    order.push(next);
                    frontier.push_back((next, depth + 1));
                }
            }
        }
        drop(topo);

        let nodes = order
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.node_ref()))
            .collect();
        Ok(Subgraph {
            root,
            nodes,
            edges: edges.into_values().collect(),
        })
    }

    /// Fingerprint of the upstream truth a node is written against: the
    /// `(id, version, hash)` of every target of its outgoing stale-producing
    /// edges.
    pub fn upstream_fingerprint(&self, id: NodeId) -> Result<ContentHash, GraphError> {
        let topo = self.read_topology();
        self.live_kind(&topo, id)?;
        let governing: Vec<NodeId> = topo
            .edges_of(id, SubgraphDirection::Outgoing)
            .into_iter()
            .filter(|e| e.edge_type.is_stale_producing())
            .map(|e| e.to)
            .collect();
        let entries: Vec<(NodeId, u64, ContentHash)> = governing
            .iter()
            .filter_map(|gid| {
                self.records
                    .get(gid)
                    .map(|r| (r.id, r.version, r.content_hash))
            })
            .collect();
        Ok(hash_upstream(&entries))
    }

    /// Learning order of objectives and content blocks.
    ///
    /// A topological order over `PREREQUISITE_FOR` edges; ties are broken by
    /// node id so the order is stable across calls.
    pub fn learning_sequence(&self) -> Vec<NodeRef> {
        let topo = self.read_topology();
        let mut candidates: Vec<NodeId> = self
            .records
            .iter()
            .filter(|r| {
                !r.tombstoned
                    && matches!(r.kind, NodeKind::LearningObjective | NodeKind::ContentBlock)
            })
            .map(|r| r.id)
            .collect();
        candidates.sort();

        let mut in_degree: HashMap<NodeId, usize> = candidates.iter().map(|&id| (id, 0)).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in topo
            .live_edges()
            .into_iter()
            .filter(|e| e.edge_type == EdgeType::PrerequisiteFor)
        {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d += 1;
            }
            successors.entry(edge.from).or_default().push(edge.to);
        }
        drop(topo);

        let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();
        let mut order = Vec::with_capacity(candidates.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for next in successors.get(&id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(*next));
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| self.records.get(&id).map(|r| r.node_ref()))
            .collect()
    }

    // -- Snapshots -------------------------------------------------------------

    /// Copies the whole graph out for persistence.
    pub fn snapshot(&self) -> CourseSnapshot {
        let topo = self.read_topology();
        let mut nodes: Vec<NodeRecord> = self.records.iter().map(|r| r.clone()).collect();
        nodes.sort_by_key(|r| r.id);
        let mut retired = topo.retired.clone();
        retired.sort_by_key(|r| r.edge.id);
        CourseSnapshot {
            nodes,
            edges: topo.live_edges(),
            retired,
        }
    }

    /// Rebuilds a graph from a snapshot, re-checking every invariant.
    ///
    /// Regenerating and Conflicted states are reset to Stale, since the
    /// leases that justified them do not survive a reload.
    pub fn from_snapshot(snapshot: CourseSnapshot) -> Result<Self, GraphError> {
        let inconsistent = |reason: String| GraphError::InconsistentSnapshot { reason };
        let graph = CourseGraph::new();
        let mut topo = graph.write_topology();

        let mut nodes = snapshot.nodes;
        nodes.sort_by_key(|r| r.id);
        for (position, mut record) in nodes.into_iter().enumerate() {
            if record.id.0 as usize != position {
                return Err(inconsistent(format!(
                    "node ids are not dense: expected {position}, found {}",
                    record.id
                )));
            }
            if hash_content(&record.content) != record.content_hash {
                return Err(inconsistent(format!("content hash mismatch on node {}", record.id)));
            }
            if matches!(record.state, NodeState::Regenerating | NodeState::Conflicted) {
                record.state = NodeState::Stale;
            }
            topo.graph.add_node(record.kind);
            graph.records.insert(record.id, record);
        }

        let mut edges = snapshot.edges;
        edges.sort_by_key(|e| e.id);
        let mut seen_ids = HashSet::new();
        for edge in edges {
            if !seen_ids.insert(edge.id) {
                return Err(inconsistent(format!("duplicate edge id {}", edge.id)));
            }
            let from_kind = graph
                .live_kind(&topo, edge.from)
                .map_err(|_| inconsistent(format!("edge {} has a dead endpoint", edge.id)))?;
            let to_kind = graph
                .live_kind(&topo, edge.to)
                .map_err(|_| inconsistent(format!("edge {} has a dead endpoint", edge.id)))?;
            if !edge.edge_type.legal_endpoints(from_kind, to_kind) {
                return Err(inconsistent(format!("edge {} violates endpoint legality", edge.id)));
            }
            if has_path_connecting(&topo.graph, edge.to.into(), edge.from.into(), None) {
                return Err(inconsistent(format!("edge {} closes a cycle", edge.id)));
            }
            topo.insert_edge(edge.from, edge.to, edge.edge_type, edge.id);
        }

        for retired in &snapshot.retired {
            topo.next_edge_id = topo.next_edge_id.max(retired.edge.id.0 + 1);
        }
        topo.retired = snapshot.retired;
        drop(topo);

        #[cfg(debug_assertions)]
        graph.assert_consistency();

        Ok(graph)
    }

    /// Verifies that topology and records agree. Debug builds only.
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        let topo = self.read_topology();
        assert_eq!(topo.graph.node_count(), self.records.len());
        for edge in topo.live_edges() {
            for endpoint in [edge.from, edge.to] {
                let record = self.records.get(&endpoint);
                assert!(
                    record.is_some_and(|r| !r.tombstoned),
                    "live edge {} touches dead node {}",
                    edge.id,
                    endpoint
                );
            }
        }
    }
}

/// Applies a state change to a record and describes it.
fn transition(
    record: &mut NodeRecord,
    new_state: NodeState,
    trigger: Option<UpstreamTrigger>,
) -> NodeStateEvent {
    let old_state = record.state;
    record.state = new_state;
    record.triggering_upstream = trigger;
    record.updated_at_ms = now_ms();
    NodeStateEvent {
        node_id: record.id,
        old_state,
        new_state,
        triggering_node_id: trigger.map(|t| t.node),
        version: record.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> Content {
        Content::text(s)
    }

    /// LO with one aligned content block and one assessment item.
    fn objective_with_dependents(graph: &CourseGraph) -> (NodeId, NodeId, NodeId) {
        let lo = graph.add_node(NodeKind::LearningObjective, text("explain recursion")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, text("recursion lesson")).id;
        let ai = graph.add_node(NodeKind::AssessmentItem, text("recursion quiz")).id;
        graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        graph.add_edge(ai, lo, EdgeType::Assesses).unwrap();
        (lo, cb, ai)
    }

    #[test]
    fn new_nodes_get_dense_ids() {
        let graph = CourseGraph::new();
        let a = graph.add_node(NodeKind::CourseOutcome, text("a"));
        let b = graph.add_node(NodeKind::LearningObjective, text("b"));
        assert_eq!(a.id, NodeId(0));
        assert_eq!(b.id, NodeId(1));
        assert_eq!(a.version, 0);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn illegal_assesses_is_rejected_unchanged() {
        let graph = CourseGraph::new();
        let ai = graph.add_node(NodeKind::AssessmentItem, text("quiz")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, text("lesson")).id;

        let err = graph.add_edge(ai, cb, EdgeType::Assesses).unwrap_err();
        assert_eq!(
            err,
            GraphError::IllegalEdgeType {
                edge_type: EdgeType::Assesses,
                from_kind: NodeKind::AssessmentItem,
                to_kind: NodeKind::ContentBlock,
            }
        );
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.get_node(ai).unwrap().version, 0);
    }

    #[test]
    fn back_edge_is_a_cycle() {
        let graph = CourseGraph::new();
        let a = graph.add_node(NodeKind::ContentBlock, text("module")).id;
        let b = graph.add_node(NodeKind::ContentBlock, text("lesson")).id;

        let first = graph.add_edge(a, b, EdgeType::ParentOf).unwrap();
        let err = graph.add_edge(b, a, EdgeType::ParentOf).unwrap_err();
        assert_eq!(err, GraphError::Cycle { from: b, to: a });
        assert_eq!(graph.edges(), vec![first.edge]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let graph = CourseGraph::new();
        let a = graph.add_node(NodeKind::ContentBlock, text("x")).id;
        assert!(matches!(
            graph.add_edge(a, a, EdgeType::PrerequisiteFor),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn cycle_check_spans_edge_types() {
        let graph = CourseGraph::new();
        let a = graph.add_node(NodeKind::LearningObjective, text("a")).id;
        let b = graph.add_node(NodeKind::LearningObjective, text("b")).id;
        graph.add_edge(a, b, EdgeType::ParentOf).unwrap();
        assert!(matches!(
            graph.add_edge(b, a, EdgeType::PrerequisiteFor),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn duplicate_edge_is_idempotent() {
        let graph = CourseGraph::new();
        let lo = graph.add_node(NodeKind::LearningObjective, text("lo")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, text("cb")).id;

        let first = graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        let again = graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.edge, again.edge);
        assert_eq!(graph.get_node(cb).unwrap().version, 1);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn version_relevant_edge_bumps_dependent_only() {
        let graph = CourseGraph::new();
        let lo = graph.add_node(NodeKind::LearningObjective, text("lo")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, text("cb")).id;
        let next = graph.add_node(NodeKind::ContentBlock, text("cb2")).id;

        let aligned = graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        assert_eq!(aligned.bumped.map(|n| (n.id, n.version)), Some((cb, 1)));
        assert_eq!(graph.get_node(lo).unwrap().version, 0);

        let prereq = graph.add_edge(cb, next, EdgeType::PrerequisiteFor).unwrap();
        assert!(prereq.bumped.is_none());
        assert_eq!(graph.get_node(cb).unwrap().version, 1);
    }

    #[test]
    fn stale_expected_version_never_overwrites() {
        let graph = CourseGraph::new();
        let lo = graph.add_node(NodeKind::LearningObjective, text("v0")).id;
        graph.mutate_node(lo, 0, text("v1")).unwrap();

        let err = graph.mutate_node(lo, 0, text("late edit")).unwrap_err();
        assert_eq!(
            err,
            GraphError::VersionConflict {
                id: lo,
                expected: 0,
                actual: 1
            }
        );
        assert_eq!(graph.get_node(lo).unwrap().content, text("v1"));
    }

    #[test]
    fn mutation_rehashes_and_keeps_state() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        graph.mark_stale(cb, UpstreamTrigger { node: lo, version: 1 });

        let before = graph.get_node(cb).unwrap();
        let outcome = graph.mutate_node(cb, before.version, text("rewritten")).unwrap();
        assert!(outcome.content_changed);
        assert_eq!(outcome.state, NodeState::Stale);
        assert_ne!(graph.get_node(cb).unwrap().content_hash, before.content_hash);

        let same = graph.mutate_node(cb, outcome.node.version, text("rewritten")).unwrap();
        assert!(!same.content_changed);
        assert_eq!(same.node.version, outcome.node.version + 1);
    }

    #[test]
    fn mark_stale_is_idempotent_per_trigger() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        let trigger = UpstreamTrigger { node: lo, version: 2 };

        assert!(matches!(graph.mark_stale(cb, trigger), MarkOutcome::Marked(_)));
        let version = graph.get_node(cb).unwrap().version;
        assert_eq!(graph.mark_stale(cb, trigger), MarkOutcome::AlreadyMarked);
        assert_eq!(
            graph.mark_stale(cb, UpstreamTrigger { node: lo, version: 1 }),
            MarkOutcome::AlreadyMarked
        );
        assert_eq!(graph.get_node(cb).unwrap().version, version);
        assert_eq!(graph.get_node(cb).unwrap().triggering_upstream, Some(trigger));
    }

    #[test]
    fn regenerating_node_becomes_conflicted() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        let ticket = graph.begin_regeneration(cb).unwrap();
        assert_eq!(ticket.event.new_state, NodeState::Regenerating);

        let outcome = graph.mark_stale(cb, UpstreamTrigger { node: lo, version: 3 });
        assert!(matches!(outcome, MarkOutcome::Conflicted(_)));
        assert_eq!(
            graph.finish_regeneration(cb, ticket.node.version, text("late")),
            Err(GraphError::Conflicted { id: cb })
        );
        let event = graph.revert_to_stale(cb).unwrap();
        assert_eq!(event.new_state, NodeState::Stale);
    }

    #[test]
    fn regenerating_node_ignores_a_repeated_trigger() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        let trigger = UpstreamTrigger { node: lo, version: 2 };
        graph.mark_stale(cb, trigger);
        graph.begin_regeneration(cb).unwrap();

        assert_eq!(graph.mark_stale(cb, trigger), MarkOutcome::AlreadyMarked);
        assert_eq!(graph.get_node(cb).unwrap().state, NodeState::Regenerating);
    }

    #[test]
    fn finish_regeneration_clears_staleness_and_bumps() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        graph.mark_stale(cb, UpstreamTrigger { node: lo, version: 0 });

        let ticket = graph.begin_regeneration(cb).unwrap();
        assert_eq!(ticket.prior_state, NodeState::Stale);
        let (node, event) = graph
            .finish_regeneration(cb, ticket.node.version, text("regenerated"))
            .unwrap();
        assert_eq!(node.version, ticket.node.version + 1);
        assert_eq!(event.new_state, NodeState::Fresh);
        let record = graph.get_node(cb).unwrap();
        assert_eq!(record.state, NodeState::Fresh);
        assert!(record.triggering_upstream.is_none());
    }

    #[test]
    fn human_edit_during_regeneration_wins() {
        let graph = CourseGraph::new();
        let (_, cb, _) = objective_with_dependents(&graph);
        let ticket = graph.begin_regeneration(cb).unwrap();

        graph.mutate_node(cb, ticket.node.version, text("human edit")).unwrap();
        assert!(matches!(
            graph.finish_regeneration(cb, ticket.node.version, text("generated")),
            Err(GraphError::VersionConflict { .. })
        ));
        assert_eq!(graph.get_node(cb).unwrap().content, text("human edit"));
    }

    #[test]
    fn abort_restores_prior_state() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        let trigger = UpstreamTrigger { node: lo, version: 0 };
        graph.mark_stale(cb, trigger);

        let ticket = graph.begin_regeneration(cb).unwrap();
        graph.abort_regeneration(&ticket).unwrap();
        let record = graph.get_node(cb).unwrap();
        assert_eq!(record.state, NodeState::Stale);
        assert_eq!(record.triggering_upstream, Some(trigger));
    }

    #[test]
    fn override_requires_current_version() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        graph.mark_stale(cb, UpstreamTrigger { node: lo, version: 0 });
        let version = graph.get_node(cb).unwrap().version;

        assert!(graph.override_state(cb, version + 5).is_err());
        let event = graph.override_state(cb, version).unwrap().unwrap();
        assert_eq!(event.new_state, NodeState::Fresh);
        assert_eq!(graph.override_state(cb, version).unwrap(), None);
    }

    #[test]
    fn remove_node_tombstones_and_retires_edges() {
        let graph = CourseGraph::new();
        let (lo, cb, ai) = objective_with_dependents(&graph);
        let cb_version = graph.get_node(cb).unwrap().version;

        let outcome = graph.remove_node(lo).unwrap();
        assert_eq!(outcome.retired.len(), 2);
        let dependents: Vec<NodeId> = outcome.dependents.iter().map(|n| n.id).collect();
        assert_eq!(dependents, vec![cb, ai]);
        assert_eq!(graph.get_node(cb).unwrap().version, cb_version + 1);

        assert_eq!(graph.get_node(lo), Err(GraphError::NodeNotFound { id: lo }));
        assert_eq!(graph.with_node(lo, |r| r.version), Err(GraphError::NodeNotFound { id: lo }));
        assert_eq!(graph.with_node(cb, |r| r.version), Ok(cb_version + 1));
        assert!(graph.mutate_node(lo, outcome.node.version, text("x")).is_err());
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.retired_edges().len(), 2);
        assert!(graph.remove_node(lo).is_err());
    }

    #[test]
    fn edge_ids_are_not_reused_after_retirement() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        graph.remove_node(lo).unwrap();
        let lo2 = graph.add_node(NodeKind::LearningObjective, text("new lo")).id;
        let edge = graph.add_edge(cb, lo2, EdgeType::AlignsTo).unwrap().edge;
        assert_eq!(edge.id, EdgeId(2));
    }

    #[test]
    fn subgraph_respects_direction_and_depth() {
        let graph = CourseGraph::new();
        let co = graph.add_node(NodeKind::CourseOutcome, text("co")).id;
        let lo = graph.add_node(NodeKind::LearningObjective, text("lo")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, text("cb")).id;
        graph.add_edge(lo, co, EdgeType::AlignsTo).unwrap();
        graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();

        let out = graph.get_subgraph(cb, SubgraphDirection::Outgoing, 10).unwrap();
        let ids: Vec<NodeId> = out.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![cb, lo, co]);
        assert_eq!(out.edges.len(), 2);

        let shallow = graph.get_subgraph(cb, SubgraphDirection::Outgoing, 1).unwrap();
        assert_eq!(shallow.nodes.len(), 2);

        let incoming = graph.get_subgraph(cb, SubgraphDirection::Incoming, 10).unwrap();
        assert_eq!(incoming.nodes.len(), 1);

        let both = graph.get_subgraph(lo, SubgraphDirection::Both, 1).unwrap();
        assert_eq!(both.nodes.len(), 3);
    }

    #[test]
    fn upstream_fingerprint_tracks_governing_versions() {
        let graph = CourseGraph::new();
        let (lo, cb, _) = objective_with_dependents(&graph);
        let before = graph.upstream_fingerprint(cb).unwrap();
        graph.mutate_node(cb, 1, text("cb edit")).unwrap();
        assert_eq!(graph.upstream_fingerprint(cb).unwrap(), before);
        graph.mutate_node(lo, 0, text("lo edit")).unwrap();
        assert_ne!(graph.upstream_fingerprint(cb).unwrap(), before);
    }

    #[test]
    fn learning_sequence_follows_prerequisites() {
        let graph = CourseGraph::new();
        let advanced = graph.add_node(NodeKind::LearningObjective, text("advanced")).id;
        let basics = graph.add_node(NodeKind::LearningObjective, text("basics")).id;
        let middle = graph.add_node(NodeKind::LearningObjective, text("middle")).id;
        graph.add_node(NodeKind::AssessmentItem, text("quiz"));
        graph.add_edge(basics, middle, EdgeType::PrerequisiteFor).unwrap();
        graph.add_edge(middle, advanced, EdgeType::PrerequisiteFor).unwrap();

        let order: Vec<NodeId> = graph.learning_sequence().iter().map(|n| n.id).collect();
        assert_eq!(order, vec![basics, middle, advanced]);
    }

    #[test]
    fn snapshot_roundtrip_resets_in_flight_states() {
        let graph = CourseGraph::new();
        let (lo, cb, ai) = objective_with_dependents(&graph);
        graph.begin_regeneration(cb).unwrap();
        graph.remove_node(ai).unwrap();

        let restored = CourseGraph::from_snapshot(graph.snapshot()).unwrap();
        assert_eq!(restored.get_node(cb).unwrap().state, NodeState::Stale);
        assert_eq!(restored.edges(), graph.edges());
        assert_eq!(restored.retired_edges().len(), 1);
        assert!(restored.get_node(ai).is_err());

        let next = restored.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        assert!(!next.created);
    }

    #[test]
    fn snapshot_with_cycle_is_rejected() {
        let graph = CourseGraph::new();
        let a = graph.add_node(NodeKind::ContentBlock, text("a")).id;
        let b = graph.add_node(NodeKind::ContentBlock, text("b")).id;
        graph.add_edge(a, b, EdgeType::ParentOf).unwrap();
        let mut snapshot = graph.snapshot();
        snapshot.edges.push(EdgeRecord {
            id: EdgeId(7),
            from: b,
            to: a,
            edge_type: EdgeType::ParentOf,
        });
        assert!(matches!(
            CourseGraph::from_snapshot(snapshot),
            Err(GraphError::InconsistentSnapshot { .. })
        ));
    }

    fn kind_strategy() -> impl Strategy<Value = NodeKind> {
        prop_oneof![
            Just(NodeKind::ProgramOutcome),
            Just(NodeKind::CourseOutcome),
            Just(NodeKind::LearningObjective),
            Just(NodeKind::ContentBlock),
            Just(NodeKind::AssessmentItem),
        ]
    }

    fn edge_type_strategy() -> impl Strategy<Value = EdgeType> {
        prop_oneof![
            Just(EdgeType::ParentOf),
            Just(EdgeType::AlignsTo),
            Just(EdgeType::Assesses),
            Just(EdgeType::PrerequisiteFor),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn accepted_edges_never_form_a_cycle(
            kinds in prop::collection::vec(kind_strategy(), 2..12),
            attempts in prop::collection::vec(
                (0usize..12, 0usize..12, edge_type_strategy()),
                0..60,
            ),
        ) {
            let graph = CourseGraph::new();
            let ids: Vec<NodeId> = kinds
                .iter()
                .map(|&k| graph.add_node(k, Content::text("n")).id)
                .collect();

            for (a, b, edge_type) in attempts {
                let from = ids[a % ids.len()];
                let to = ids[b % ids.len()];
                let before = graph.edges();
                match graph.add_edge(from, to, edge_type) {
                    Ok(_) => {}
                    Err(GraphError::Cycle { .. }) | Err(GraphError::IllegalEdgeType { .. }) => {
                        prop_assert_eq!(graph.edges(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other}"),
                }
                prop_assert!(graph.is_acyclic());
            }
        }
    }
}
