//! Tiered context assembly for regeneration.
//!
//! [`ContextAssembler::build`] collects the nodes a generator needs to see
//! when rewriting one target node. Each [`Tier`] adds a ring of the graph on
//! top of the previous one:
//!
//! - Atomic: PARENT_OF siblings.
//! - Local: the PARENT_OF ancestor chain.
//! - Structural: governing nodes across ALIGNS_TO/ASSESSES, their other
//!   dependents, and the target's own dependents.
//! - Global: a bounded sample suggested by the retrieval collaborator.
//!
//! Candidates are ranked by structural distance, then recency, then id. When
//! the tier's token budget is exceeded the least relevant tail is dropped
//! and recorded in [`ContextPayload::truncated`]. The target is always kept.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use coursegraph_core::edge::EdgeType;
use coursegraph_core::error::GraphError;
use coursegraph_core::graph::{CourseGraph, SubgraphDirection};
use coursegraph_core::hash::{hash_context_key, ContentHash};
use coursegraph_core::id::NodeId;
use coursegraph_core::node::{Content, NodeRecord, NodeRef};
use coursegraph_storage::CourseId;

use crate::collaborators::Retrieval;
use crate::config::TierBudgets;

/// Distance assigned to retrieved nodes, beyond any structural ring.
const RETRIEVED_DISTANCE: u32 = 16;

/// How much of the graph a context includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Atomic,
    Local,
    Structural,
    Global,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Atomic, Tier::Local, Tier::Structural, Tier::Global];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Atomic => "atomic",
            Tier::Local => "local",
            Tier::Structural => "structural",
            Tier::Global => "global",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown tier '{s}'"))
    }
}

/// Why a node is part of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    Target,
    Sibling,
    Ancestor,
    Governing,
    Peer,
    Dependent,
    Retrieved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextItem {
    pub node: NodeRef,
    pub role: ContextRole,
    pub distance: u32,
    pub content_hash: ContentHash,
    pub tokens: usize,
    pub content: Content,
}

/// The bounded, ordered input of one generator call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPayload {
    pub target: NodeRef,
    pub tier: Tier,
    /// Target first, then included nodes in relevance order.
    pub items: Vec<ContextItem>,
    /// Candidates dropped to respect the budget, most relevant first.
    pub truncated: Vec<NodeRef>,
    pub budget: usize,
    pub used_tokens: usize,
    pub cache_key: ContentHash,
    /// Fingerprint of the target's governing nodes when the context was
    /// built. Regeneration results are only applied while it still holds.
    pub upstream_fingerprint: ContentHash,
}

impl ContextPayload {
    /// `true` when some candidates were dropped.
    pub fn is_degraded(&self) -> bool {
        !self.truncated.is_empty()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.items.iter().map(|i| i.node.id).collect()
    }
}

/// One included node, decided before its content is copied.
struct PlannedItem {
    node: NodeRef,
    role: ContextRole,
    distance: u32,
    content_hash: ContentHash,
    tokens: usize,
}

impl PlannedItem {
    fn of(record: &NodeRecord, role: ContextRole, distance: u32) -> Self {
        PlannedItem {
            node: record.node_ref(),
            role,
            distance,
            content_hash: record.content_hash,
            tokens: record.content.estimated_tokens(),
        }
    }
}

/// Everything a payload holds except node contents.
struct Plan {
    tier: Tier,
    items: Vec<PlannedItem>,
    truncated: Vec<NodeRef>,
    budget: usize,
    used_tokens: usize,
    cache_key: ContentHash,
    upstream_fingerprint: ContentHash,
}

impl Plan {
    /// Whether `payload` was built from the same inputs.
    fn matches(&self, payload: &ContextPayload) -> bool {
        self.upstream_fingerprint == payload.upstream_fingerprint
            && self.truncated == payload.truncated
            && self.items.len() == payload.items.len()
            && self
                .items
                .iter()
                .zip(&payload.items)
                .all(|(a, b)| a.node == b.node && a.role == b.role)
    }
}

/// A built context and whether it came from the cache.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub payload: Arc<ContextPayload>,
    pub cache_hit: bool,
}

/// Builds context payloads for one course.
pub struct ContextAssembler {
    course: CourseId,
    graph: Arc<CourseGraph>,
    retrieval: Arc<dyn Retrieval>,
    budgets: TierBudgets,
    global_sample: usize,
    cache: Mutex<LruCache<ContentHash, Arc<ContextPayload>>>,
}

impl ContextAssembler {
    pub fn new(
        course: CourseId,
        graph: Arc<CourseGraph>,
        retrieval: Arc<dyn Retrieval>,
        budgets: TierBudgets,
        global_sample: usize,
        cache_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        ContextAssembler {
            course,
            graph,
            retrieval,
            budgets,
            global_sample,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Builds the context of `target` at `tier`.
    ///
    /// The included set and cache key are planned from content hashes and
    /// token estimates alone. Contents are copied into a new payload only
    /// on a cache miss; a hit hands back the cached payload.
    pub async fn build(&self, target: NodeId, tier: Tier) -> Result<AssembledContext, GraphError> {
        let mut candidates = structural_candidates(&self.graph, target, tier);
        if tier == Tier::Global {
            self.add_retrieved(target, &mut candidates).await;
        }
        let budget = self.budgets.for_tier(tier);

        loop {
            let plan = self.plan(target, tier, &candidates, budget)?;
            let key = plan.cache_key;
            {
                let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(cached) = cache.get(&key).filter(|cached| plan.matches(cached)) {
                    tracing::debug!(node = %target, %tier, key = %key, "context cache hit");
                    return Ok(AssembledContext {
                        payload: Arc::clone(cached),
                        cache_hit: true,
                    });
                }
            }

            // A planned node changed before its content was copied.
            let Some(payload) = self.fill(plan) else {
                tracing::debug!(node = %target, %tier, "context inputs moved, replanning");
                continue;
            };
            let payload = Arc::new(payload);
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key, Arc::clone(&payload));

            tracing::debug!(
                node = %target,
                %tier,
                included = payload.items.len(),
                truncated = payload.truncated.len(),
                used_tokens = payload.used_tokens,
                budget,
                "context assembled"
            );
            return Ok(AssembledContext {
                payload,
                cache_hit: false,
            });
        }
    }

    /// Ranks the candidates and fits them into `budget`.
    fn plan(
        &self,
        target: NodeId,
        tier: Tier,
        candidates: &IndexMap<NodeId, (ContextRole, u32)>,
        budget: usize,
    ) -> Result<Plan, GraphError> {
        let head = self
            .graph
            .with_node(target, |r| PlannedItem::of(r, ContextRole::Target, 0))?;

        let mut ranked: Vec<(PlannedItem, u64)> = candidates
            .iter()
            .filter_map(|(&id, &(role, distance))| {
                self.graph
                    .with_node(id, |r| (PlannedItem::of(r, role, distance), r.updated_at_ms))
                    .ok()
            })
            .collect();
        ranked.sort_by_key(|(p, updated_at_ms)| (p.distance, Reverse(*updated_at_ms), p.node.id));

        let mut used_tokens = head.tokens;
        let mut items = vec![head];
        let mut truncated = Vec::new();
        for (planned, _) in ranked {
            if truncated.is_empty() && used_tokens + planned.tokens <= budget {
                used_tokens += planned.tokens;
                items.push(planned);
            } else {
                truncated.push(planned.node);
            }
        }

        let included: Vec<(NodeId, ContentHash)> =
            items.iter().map(|i| (i.node.id, i.content_hash)).collect();
        Ok(Plan {
            tier,
            cache_key: hash_context_key(target, tier.as_str(), &included),
            upstream_fingerprint: self.graph.upstream_fingerprint(target)?,
            items,
            truncated,
            budget,
            used_tokens,
        })
    }

    /// Copies planned contents into a payload. `None` if any planned node
    /// was removed or rewritten since planning.
    fn fill(&self, plan: Plan) -> Option<ContextPayload> {
        let mut items = Vec::with_capacity(plan.items.len());
        for planned in plan.items {
            let content = self
                .graph
                .with_node(planned.node.id, |r| {
                    (r.content_hash == planned.content_hash).then(|| r.content.clone())
                })
                .ok()
                .flatten()?;
            items.push(ContextItem {
                node: planned.node,
                role: planned.role,
                distance: planned.distance,
                content_hash: planned.content_hash,
                tokens: planned.tokens,
                content,
            });
        }
        Some(ContextPayload {
            target: items.first()?.node,
            tier: plan.tier,
            items,
            truncated: plan.truncated,
            budget: plan.budget,
            used_tokens: plan.used_tokens,
            cache_key: plan.cache_key,
            upstream_fingerprint: plan.upstream_fingerprint,
        })
    }

    async fn add_retrieved(
        &self,
        target: NodeId,
        candidates: &mut IndexMap<NodeId, (ContextRole, u32)>,
    ) {
        match self
            .retrieval
            .fetch_related(target, self.course, self.global_sample)
            .await
        {
            Ok(related) => {
                for node in related.into_iter().take(self.global_sample) {
                    if node.id != target {
                        offer(candidates, node.id, ContextRole::Retrieved, RETRIEVED_DISTANCE);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    node = %target,
                    error = %err,
                    "retrieval failed, global context has no sample"
                );
            }
        }
    }
}

/// Records a candidate, keeping the smallest distance seen for it.
fn offer(
    candidates: &mut IndexMap<NodeId, (ContextRole, u32)>,
    id: NodeId,
    role: ContextRole,
    distance: u32,
) {
    match candidates.get(&id) {
        Some((_, existing)) if *existing <= distance => {}
        _ => {
            candidates.insert(id, (role, distance));
        }
    }
}

fn parents(graph: &CourseGraph, id: NodeId) -> Vec<NodeId> {
    graph
        .edges_of(id, SubgraphDirection::Incoming)
        .into_iter()
        .filter(|e| e.edge_type == EdgeType::ParentOf)
        .map(|e| e.from)
        .collect()
}

/// Structural candidates of every ring up to `tier`, target excluded.
fn structural_candidates(
    graph: &CourseGraph,
    target: NodeId,
    tier: Tier,
) -> IndexMap<NodeId, (ContextRole, u32)> {
    let mut candidates = IndexMap::new();
    let direct_parents = parents(graph, target);

    for &parent in &direct_parents {
        for edge in graph.edges_of(parent, SubgraphDirection::Outgoing) {
            if edge.edge_type == EdgeType::ParentOf && edge.to != target {
                offer(&mut candidates, edge.to, ContextRole::Sibling, 2);
            }
        }
    }
    if tier == Tier::Atomic {
        return candidates;
    }

    let mut seen: HashSet<NodeId> = HashSet::from([target]);
    let mut frontier = direct_parents;
    let mut depth = 1;
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for id in frontier {
            if seen.insert(id) {
                offer(&mut candidates, id, ContextRole::Ancestor, depth);
                next.extend(parents(graph, id));
            }
        }
        frontier = next;
        depth += 1;
    }
    if tier == Tier::Local {
        return candidates;
    }

    for edge in graph.edges_of(target, SubgraphDirection::Outgoing) {
        if !edge.edge_type.is_stale_producing() {
            continue;
        }
        offer(&mut candidates, edge.to, ContextRole::Governing, 1);
        for peer in graph.edges_of(edge.to, SubgraphDirection::Incoming) {
            if peer.edge_type.is_stale_producing() && peer.from != target {
                offer(&mut candidates, peer.from, ContextRole::Peer, 2);
            }
        }
    }
    for edge in graph.edges_of(target, SubgraphDirection::Incoming) {
        if edge.edge_type.is_stale_producing() {
            offer(&mut candidates, edge.from, ContextRole::Dependent, 1);
        }
    }
    candidates
}
