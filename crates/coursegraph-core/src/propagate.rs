//! Staleness propagation.
//!
//! A changed node `n` at version `v` invalidates every node that depends on
//! it through `ALIGNS_TO` or `ASSESSES`, transitively. Propagation walks
//! those edges against their direction, breadth-first, and records
//! `(n, v)` as the trigger on each node it marks.
//!
//! Re-running the same `(n, v)` is a no-op: a node already carrying a trigger
//! from `n` at version `v` or newer is neither re-marked nor walked through.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::graph::{CourseGraph, MarkOutcome, RemovalOutcome};
use crate::id::NodeId;
use crate::node::{NodeStateEvent, UpstreamTrigger};

/// One unit of propagation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationJob {
    pub origin: NodeId,
    pub version: u64,
    /// Starting nodes when the origin can no longer be walked from (it was
    /// removed). `None` starts from the origin's current dependents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeds: Option<Vec<NodeId>>,
}

impl PropagationJob {
    /// Job for a content change or version-relevant edge change on `origin`.
    pub fn for_change(origin: NodeId, version: u64) -> Self {
        PropagationJob {
            origin,
            version,
            seeds: None,
        }
    }

    /// Job for a node removal, seeded with its former dependents.
    pub fn for_removal(removal: &RemovalOutcome) -> Self {
        PropagationJob {
            origin: removal.node.id,
            version: removal.node.version,
            seeds: Some(removal.dependents.iter().map(|n| n.id).collect()),
        }
    }

    pub fn trigger(&self) -> UpstreamTrigger {
        UpstreamTrigger {
            node: self.origin,
            version: self.version,
        }
    }
}

/// What one propagation pass changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub origin: NodeId,
    pub version: u64,
    /// Nodes newly marked Stale, in visit order.
    pub marked: Vec<NodeId>,
    /// Regenerating nodes moved to Conflicted.
    pub conflicted: Vec<NodeId>,
    pub events: Vec<NodeStateEvent>,
}

impl PropagationReport {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Runs one propagation pass against the graph.
pub fn propagate(graph: &CourseGraph, job: &PropagationJob) -> PropagationReport {
    let trigger = job.trigger();
    let mut report = PropagationReport {
        origin: job.origin,
        version: job.version,
        marked: Vec::new(),
        conflicted: Vec::new(),
        events: Vec::new(),
    };

    let mut visited: HashSet<NodeId> = HashSet::from([job.origin]);
    let start = match &job.seeds {
        Some(seeds) => seeds.clone(),
        None => graph.stale_dependents(job.origin),
    };
    let mut queue: VecDeque<NodeId> = start.into_iter().filter(|id| visited.insert(*id)).collect();

    while let Some(id) = queue.pop_front() {
        let event = match graph.mark_stale(id, trigger) {
            MarkOutcome::Marked(event) => {
                report.marked.push(id);
                event
            }
            MarkOutcome::Conflicted(event) => {
                report.conflicted.push(id);
                event
            }
            MarkOutcome::AlreadyMarked | MarkOutcome::Missing => continue,
        };
        tracing::debug!(
            node = %id,
            origin = %job.origin,
            version = job.version,
            new_state = %event.new_state,
            "propagation marked node"
        );
        report.events.push(event);

        for next in graph.stale_dependents(id) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    report
}
