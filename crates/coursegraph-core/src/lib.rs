//! Core graph model for course dependency tracking.
//!
//! Provides the arena graph of pedagogical nodes and typed edges, its
//! structural invariants (acyclicity, endpoint legality, versioning),
//! content hashing, staleness propagation, and impact previews.

pub mod edge;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod impact;
pub mod node;
pub mod propagate;

pub use edge::{EdgeRecord, EdgeType, RetiredEdge};
pub use error::GraphError;
pub use graph::{
    CourseGraph, CourseSnapshot, EdgeOutcome, MarkOutcome, MutationOutcome, RegenerationTicket,
    RemovalOutcome, Subgraph, SubgraphDirection,
};
pub use hash::ContentHash;
pub use id::{EdgeId, NodeId};
pub use impact::{preview_impact, ImpactEntry, ImpactReport, ProposedChange};
pub use node::{Content, NodeKind, NodeRecord, NodeRef, NodeState, NodeStateEvent, UpstreamTrigger};
pub use propagate::{propagate, PropagationJob, PropagationReport};
