//! Regeneration coordinator.
//!
//! One regeneration runs `LeaseAcquired -> Calling -> Applying` under a
//! per-node lease:
//!
//! 1. Take the lease (fail fast if held) and move the node to Regenerating.
//! 2. Build the context payload and call the generator under a timeout.
//! 3. Re-check the lease, the upstream fingerprint, and the node state, then
//!    commit the result at the version observed when the lease was taken.
//!
//! A result is discarded as superseded if the node turned Conflicted, its
//! governing nodes changed, the node was edited or removed meanwhile, or
//! the lease expired. Timeouts and generator failures restore the state the
//! node had before the lease, but only while the lease is still held. The
//! lease is released on every path.
//!
//! A committed result is a content change like any other: the node's
//! dependents are queued for propagation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coursegraph_core::error::GraphError;
use coursegraph_core::graph::{CourseGraph, RegenerationTicket};
use coursegraph_core::hash::ContentHash;
use coursegraph_core::id::NodeId;
use coursegraph_core::node::NodeRef;
use coursegraph_core::propagate::PropagationJob;

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::concurrency::{LeaseError, LeaseId, LeaseManager, LeasePhase};
use crate::context::{ContextAssembler, Tier};
use crate::notify::Notifier;
use crate::propagation::PropagationQueue;

/// Why a finished generation was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersededReason {
    /// An upstream change reached the node while the call was outstanding.
    UpstreamChanged,
    /// A caller edited the node while the call was outstanding.
    ConcurrentEdit,
    /// The node was removed.
    Removed,
    /// The lease expired before the result came back.
    LeaseExpired,
}

impl std::fmt::Display for SupersededReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SupersededReason::UpstreamChanged => "upstream_changed",
            SupersededReason::ConcurrentEdit => "concurrent_edit",
            SupersededReason::Removed => "removed",
            SupersededReason::LeaseExpired => "lease_expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegenerateError {
    #[error("NodeId({node}) is already being regenerated")]
    AlreadyRegenerating { node: NodeId },

    #[error("regeneration of NodeId({node}) superseded: {reason}")]
    Superseded { node: NodeId, reason: SupersededReason },

    #[error("generation for NodeId({node}) timed out (context {context_hash})")]
    GenerationTimeout { node: NodeId, context_hash: ContentHash },

    #[error("generation for NodeId({node}) failed (context {context_hash}): {source}")]
    GenerationFailed {
        node: NodeId,
        context_hash: ContentHash,
        source: CollaboratorError,
    },

    #[error("no tier given and no tier classifier configured")]
    NoTier,

    #[error("tier classification failed: {0}")]
    Classifier(CollaboratorError),

    #[error("no generator configured")]
    NoGenerator,

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// What the caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationRequest {
    pub tier: Option<Tier>,
    pub instruction: Option<String>,
    /// Overrides the configured generation timeout. Never exceeds the
    /// lease TTL.
    pub timeout: Option<Duration>,
}

/// A committed regeneration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegenerationOutcome {
    pub node: NodeRef,
    pub tier: Tier,
    pub context_hash: ContentHash,
    pub cache_hit: bool,
    pub truncated: Vec<NodeRef>,
    pub metadata: serde_json::Value,
}

/// Releases the lease when dropped.
struct LeaseGuard<'a> {
    leases: &'a LeaseManager,
    node: NodeId,
    lease: LeaseId,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.leases.release(self.node, self.lease);
    }
}

/// Runs regenerations for one course.
pub struct Coordinator {
    graph: Arc<CourseGraph>,
    leases: Arc<LeaseManager>,
    assembler: Arc<ContextAssembler>,
    notifier: Notifier,
    propagation: Arc<PropagationQueue>,
    collaborators: Collaborators,
    default_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        graph: Arc<CourseGraph>,
        leases: Arc<LeaseManager>,
        assembler: Arc<ContextAssembler>,
        notifier: Notifier,
        propagation: Arc<PropagationQueue>,
        collaborators: Collaborators,
        default_timeout: Duration,
    ) -> Self {
        Coordinator {
            graph,
            leases,
            assembler,
            notifier,
            propagation,
            collaborators,
            default_timeout,
        }
    }

    async fn resolve_tier(&self, request: &RegenerationRequest) -> Result<Tier, RegenerateError> {
        if let Some(tier) = request.tier {
            return Ok(tier);
        }
        let classifier = self.collaborators.classifier.as_ref().ok_or(RegenerateError::NoTier)?;
        let instruction = request.instruction.as_deref().unwrap_or_default();
        classifier
            .classify_tier(instruction)
            .await
            .map_err(RegenerateError::Classifier)
    }

    /// How long the generator may take: the requested or configured timeout,
    /// capped at the lease TTL.
    fn call_timeout(&self, request: &RegenerationRequest) -> Duration {
        request
            .timeout
            .unwrap_or(self.default_timeout)
            .min(self.leases.ttl())
    }

    /// Regenerates `node`.
    pub async fn regenerate(
        &self,
        node: NodeId,
        request: RegenerationRequest,
    ) -> Result<RegenerationOutcome, RegenerateError> {
        let generator = self
            .collaborators
            .generator
            .clone()
            .ok_or(RegenerateError::NoGenerator)?;
        self.graph.node_ref(node)?;
        let tier = self.resolve_tier(&request).await?;

        let lease = self.leases.acquire(node).map_err(|err| match err {
            LeaseError::AlreadyHeld { .. } | LeaseError::NotHeld { .. } => {
                RegenerateError::AlreadyRegenerating { node }
            }
        })?;
        let _guard = LeaseGuard {
            leases: self.leases.as_ref(),
            node,
            lease: lease.id,
        };

        let ticket = self.graph.begin_regeneration(node)?;
        self.notifier.publish(ticket.event);
        tracing::info!(
            node = %node,
            lease = %lease.id,
            %tier,
            version = ticket.node.version,
            "regeneration started"
        );

        let context = match self.assembler.build(node, tier).await {
            Ok(context) => context,
            Err(err) => {
                if !self.abort(&ticket, lease.id) {
                    return Err(self.superseded(node, SupersededReason::LeaseExpired, false));
                }
                return Err(err.into());
            }
        };
        let payload = context.payload;
        let context_hash = payload.cache_key;

        if self.leases.enter_phase(node, lease.id, LeasePhase::Calling).is_err() {
            return Err(self.superseded(node, SupersededReason::LeaseExpired, false));
        }

        let instruction = request.instruction.clone().unwrap_or_default();
        let timeout = self.call_timeout(&request);
        let call = generator.generate(&payload, &instruction);
        let generated = match tokio::time::timeout(timeout, call).await {
            Err(_) => {
                if !self.abort(&ticket, lease.id) {
                    return Err(self.superseded(node, SupersededReason::LeaseExpired, false));
                }
                tracing::warn!(
                    node = %node,
                    context = %context_hash,
                    ?timeout,
                    "generation timed out"
                );
                return Err(RegenerateError::GenerationTimeout { node, context_hash });
            }
            Ok(Err(source)) => {
                if !self.abort(&ticket, lease.id) {
                    return Err(self.superseded(node, SupersededReason::LeaseExpired, false));
                }
                tracing::warn!(
                    node = %node,
                    context = %context_hash,
                    error = %source,
                    "generation failed"
                );
                return Err(RegenerateError::GenerationFailed {
                    node,
                    context_hash,
                    source,
                });
            }
            Ok(Ok(generated)) if generated.content.is_empty() => {
                if !self.abort(&ticket, lease.id) {
                    return Err(self.superseded(node, SupersededReason::LeaseExpired, false));
                }
                return Err(RegenerateError::GenerationFailed {
                    node,
                    context_hash,
                    source: CollaboratorError::InvalidResponse(
                        "generator returned empty content".to_string(),
                    ),
                });
            }
            Ok(Ok(generated)) => generated,
        };

        if self.leases.enter_phase(node, lease.id, LeasePhase::Applying).is_err() {
            return Err(self.superseded(node, SupersededReason::LeaseExpired, false));
        }

        match self.graph.upstream_fingerprint(node) {
            Ok(current) if current == payload.upstream_fingerprint => {}
            Ok(_) => return Err(self.superseded(node, SupersededReason::UpstreamChanged, true)),
            Err(_) => return Err(self.superseded(node, SupersededReason::Removed, false)),
        }

        match self.graph.finish_regeneration(node, ticket.node.version, generated.content) {
            Ok((committed, event)) => {
                self.notifier.publish(event);
                self.propagation
                    .enqueue(PropagationJob::for_change(committed.id, committed.version));
                tracing::info!(
                    node = %node,
                    version = committed.version,
                    context = %context_hash,
                    "regeneration applied"
                );
                Ok(RegenerationOutcome {
                    node: committed,
                    tier,
                    context_hash,
                    cache_hit: context.cache_hit,
                    truncated: payload.truncated.clone(),
                    metadata: generated.metadata,
                })
            }
            Err(GraphError::Conflicted { .. }) => {
                Err(self.superseded(node, SupersededReason::UpstreamChanged, true))
            }
            Err(GraphError::VersionConflict { .. }) => {
                Err(self.superseded(node, SupersededReason::ConcurrentEdit, true))
            }
            Err(GraphError::NodeNotFound { .. }) => {
                Err(self.superseded(node, SupersededReason::Removed, false))
            }
            Err(err) => {
                self.revert(node);
                Err(err.into())
            }
        }
    }

    /// Restores the node's pre-lease state. Returns `false`, leaving the
    /// node alone, once `lease` has been reclaimed: the node then belongs to
    /// the sweep or to a newer attempt.
    fn abort(&self, ticket: &RegenerationTicket, lease: LeaseId) -> bool {
        let restored = self
            .leases
            .while_held(ticket.node.id, lease, || self.graph.abort_regeneration(ticket));
        match restored {
            Some(event) => {
                if let Some(event) = event {
                    self.notifier.publish(event);
                }
                true
            }
            None => false,
        }
    }

    fn revert(&self, node: NodeId) {
        if let Some(event) = self.graph.revert_to_stale(node) {
            self.notifier.publish(event);
        }
    }

    fn superseded(&self, node: NodeId, reason: SupersededReason, revert: bool) -> RegenerateError {
        if revert {
            self.revert(node);
        }
        tracing::info!(node = %node, %reason, "regeneration superseded");
        RegenerateError::Superseded { node, reason }
    }
}
