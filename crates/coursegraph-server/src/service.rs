//! Per-course orchestrator.
//!
//! [`CourseService`] owns one course's live graph together with its lease
//! table, propagation workers, context assembler, and regeneration
//! coordinator. Mutations return as soon as the graph has accepted them;
//! staleness propagation runs on the worker pool.
//!
//! Persistence is incremental: [`CourseService::persist`] writes only rows
//! that changed since the previous flush.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use coursegraph_core::edge::EdgeType;
use coursegraph_core::graph::{
    CourseGraph, EdgeOutcome, MutationOutcome, RemovalOutcome, Subgraph, SubgraphDirection,
};
use coursegraph_core::id::NodeId;
use coursegraph_core::impact::{preview_impact, ImpactReport, ProposedChange};
use coursegraph_core::node::{Content, NodeKind, NodeRecord, NodeRef, NodeStateEvent};
use coursegraph_core::propagate::PropagationJob;
use coursegraph_storage::{compute_dirty_set, CourseId, CourseStore, PersistedStamps, StorageError};

use crate::collaborators::Collaborators;
use crate::concurrency::{LeaseManager, LeaseStatusEntry};
use crate::config::OrchestratorConfig;
use crate::context::{AssembledContext, ContextAssembler, Tier};
use crate::error::ApiError;
use crate::notify::Notifier;
use crate::propagation::PropagationQueue;
use crate::regenerate::{Coordinator, RegenerateError, RegenerationOutcome, RegenerationRequest};

/// Store shared by every course, behind an async mutex.
pub type SharedStore = Arc<tokio::sync::Mutex<Box<dyn CourseStore + Send>>>;

/// Live orchestrator of one course.
pub struct CourseService {
    id: CourseId,
    graph: Arc<CourseGraph>,
    leases: Arc<LeaseManager>,
    notifier: Notifier,
    propagation: Arc<PropagationQueue>,
    assembler: Arc<ContextAssembler>,
    coordinator: Arc<Coordinator>,
    /// What the store held after the last flush. Held for the whole flush
    /// so that flushes of one course are serialized.
    stamps: tokio::sync::Mutex<PersistedStamps>,
    lease_sweep: JoinHandle<()>,
}

impl CourseService {
    /// Starts the orchestrator for `graph`, whose current state is what the
    /// store holds according to `stamps`.
    pub fn start(
        id: CourseId,
        graph: CourseGraph,
        stamps: PersistedStamps,
        config: &OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Self {
        let graph = Arc::new(graph);
        let notifier = Notifier::new(config.event_capacity);
        let leases = Arc::new(LeaseManager::new(config.lease_ttl));
        let lease_sweep = leases.start_expiry_sweep(
            Arc::clone(&graph),
            notifier.clone(),
            config.lease_sweep_interval,
        );
        let propagation = Arc::new(PropagationQueue::start(
            Arc::clone(&graph),
            notifier.clone(),
            config.propagation_workers,
        ));
        let assembler = Arc::new(ContextAssembler::new(
            id,
            Arc::clone(&graph),
            Arc::clone(&collaborators.retrieval),
            config.budgets,
            config.global_sample,
            config.context_cache_capacity,
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&graph),
            Arc::clone(&leases),
            Arc::clone(&assembler),
            notifier.clone(),
            Arc::clone(&propagation),
            collaborators,
            config.generation_timeout,
        ));

        tracing::info!(
            course = %id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "course loaded"
        );
        CourseService {
            id,
            graph,
            leases,
            notifier,
            propagation,
            assembler,
            coordinator,
            stamps: tokio::sync::Mutex::new(stamps),
            lease_sweep,
        }
    }

    pub fn id(&self) -> CourseId {
        self.id
    }

    pub fn graph(&self) -> &Arc<CourseGraph> {
        &self.graph
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeStateEvent> {
        self.notifier.subscribe()
    }

    // -- Mutations -----------------------------------------------------------

    pub fn add_node(&self, kind: NodeKind, content: Content) -> Result<NodeRecord, ApiError> {
        let node = self.graph.add_node(kind, content);
        Ok(self.graph.get_node(node.id)?)
    }

    /// Adds an edge; a version-relevant edge re-verifies the bumped
    /// endpoint's dependents.
    pub fn add_edge(
        &self,
        from: NodeId,
        to: NodeId,
        edge_type: EdgeType,
    ) -> Result<EdgeOutcome, ApiError> {
        let outcome = self.graph.add_edge(from, to, edge_type)?;
        if let Some(bumped) = outcome.bumped {
            self.propagation
                .enqueue(PropagationJob::for_change(bumped.id, bumped.version));
        }
        Ok(outcome)
    }

    pub fn mutate_node(
        &self,
        id: NodeId,
        expected_version: u64,
        content: Content,
    ) -> Result<(MutationOutcome, bool), ApiError> {
        let outcome = self.graph.mutate_node(id, expected_version, content)?;
        let enqueued = outcome.content_changed;
        if enqueued {
            self.propagation
                .enqueue(PropagationJob::for_change(id, outcome.node.version));
        }
        Ok((outcome, enqueued))
    }

    pub fn remove_node(&self, id: NodeId) -> Result<RemovalOutcome, ApiError> {
        let outcome = self.graph.remove_node(id)?;
        if !outcome.dependents.is_empty() {
            self.propagation.enqueue(PropagationJob::for_removal(&outcome));
        }
        Ok(outcome)
    }

    /// Explicit override clearing Stale or Conflicted.
    pub fn override_state(
        &self,
        id: NodeId,
        expected_version: u64,
    ) -> Result<(NodeRecord, bool), ApiError> {
        let event = self.graph.override_state(id, expected_version)?;
        let changed = event.is_some();
        if let Some(event) = event {
            self.notifier.publish(event);
        }
        Ok((self.graph.get_node(id)?, changed))
    }

    // -- Queries -------------------------------------------------------------

    pub fn get_node(&self, id: NodeId) -> Result<NodeRecord, ApiError> {
        Ok(self.graph.get_node(id)?)
    }

    pub fn subgraph(
        &self,
        id: NodeId,
        direction: SubgraphDirection,
        max_depth: usize,
    ) -> Result<Subgraph, ApiError> {
        Ok(self.graph.get_subgraph(id, direction, max_depth)?)
    }

    pub fn preview_impact(
        &self,
        id: NodeId,
        change: ProposedChange,
    ) -> Result<ImpactReport, ApiError> {
        Ok(preview_impact(&self.graph, id, change)?)
    }

    pub fn stale_nodes(&self) -> Vec<NodeRecord> {
        self.graph.stale_nodes()
    }

    pub fn learning_sequence(&self) -> Vec<NodeRef> {
        self.graph.learning_sequence()
    }

    pub fn lease_status(&self) -> Vec<LeaseStatusEntry> {
        self.leases.status()
    }

    // -- Context and regeneration --------------------------------------------

    pub async fn build_context(
        &self,
        id: NodeId,
        tier: Tier,
    ) -> Result<AssembledContext, ApiError> {
        Ok(self.assembler.build(id, tier).await?)
    }

    /// Runs a regeneration to completion on its own task, so that a caller
    /// going away cannot leave the node Regenerating. A committed result
    /// queues propagation to the node's dependents.
    pub async fn regenerate(
        &self,
        id: NodeId,
        request: RegenerationRequest,
    ) -> Result<RegenerationOutcome, RegenerateError> {
        let coordinator = Arc::clone(&self.coordinator);
        let task = tokio::spawn(async move { coordinator.regenerate(id, request).await });
        match task.await {
            Ok(result) => result,
            Err(join) => {
                tracing::error!(
                    course = %self.id,
                    node = %id,
                    error = %join,
                    "regeneration task failed"
                );
                if let Some(event) = self.graph.revert_to_stale(id) {
                    self.notifier.publish(event);
                }
                Err(RegenerateError::Superseded {
                    node: id,
                    reason: crate::regenerate::SupersededReason::LeaseExpired,
                })
            }
        }
    }

    // -- Propagation and persistence -----------------------------------------

    pub fn pending_propagation(&self) -> usize {
        self.propagation.pending()
    }

    /// Waits until every queued propagation job has run.
    pub async fn settle(&self) {
        self.propagation.settle().await;
    }

    /// Writes rows changed since the last flush. Returns how many rows
    /// were written.
    pub async fn persist(&self, store: &SharedStore) -> Result<usize, StorageError> {
        let mut stamps = self.stamps.lock().await;
        let snapshot = self.graph.snapshot();
        let dirty = compute_dirty_set(&snapshot, &stamps);
        if dirty.is_clean() {
            return Ok(0);
        }

        store.lock().await.apply_dirty(self.id, &snapshot, &dirty)?;
        *stamps = PersistedStamps::from_snapshot(&snapshot);
        tracing::debug!(
            course = %self.id,
            new = dirty.new.len(),
            modified = dirty.modified.len(),
            edges_added = dirty.edges_added.len(),
            edges_retired = dirty.edges_retired.len(),
            "course flushed"
        );
        Ok(dirty.total())
    }
}

impl Drop for CourseService {
    fn drop(&mut self) {
        self.lease_sweep.abort();
    }
}
