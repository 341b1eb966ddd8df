//! Per-node regeneration leases with TTL-based expiry.
//!
//! [`LeaseManager`] grants at most one lease per node. A lease moves through
//! [`LeasePhase`]s as the regeneration proceeds; a periodic sweep reclaims
//! leases whose holder never finished and puts their nodes back to Stale.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use coursegraph_core::graph::CourseGraph;
use coursegraph_core::id::NodeId;

use crate::notify::Notifier;

/// Identity of one lease grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        LeaseId(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the lease holder is in the regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeasePhase {
    LeaseAcquired,
    Calling,
    Applying,
}

#[derive(Debug, Clone)]
pub struct Lease {
    pub id: LeaseId,
    pub node: NodeId,
    pub phase: LeasePhase,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

/// Errors from lease operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    /// Another regeneration holds the node.
    #[error("NodeId({node}) is already being regenerated (lease {holder})")]
    AlreadyHeld { node: NodeId, holder: LeaseId },

    /// The lease expired or was released.
    #[error("lease {lease} on NodeId({node}) is no longer held")]
    NotHeld { node: NodeId, lease: LeaseId },
}

/// Status entry for one held lease.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseStatusEntry {
    pub node_id: NodeId,
    pub lease_id: LeaseId,
    pub phase: LeasePhase,
    pub held_for_ms: u64,
    pub expires_at: String,
}

/// Per-node lease table.
pub struct LeaseManager {
    leases: DashMap<NodeId, Lease>,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(ttl: Duration) -> Self {
        LeaseManager {
            leases: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Grants a lease on `node`, failing fast if a live one exists.
    ///
    /// An expired lease that the sweep has not reclaimed yet still blocks:
    /// only the sweep reverts its node.
    pub fn acquire(&self, node: NodeId) -> Result<Lease, LeaseError> {
        match self.leases.entry(node) {
            Entry::Occupied(held) => Err(LeaseError::AlreadyHeld {
                node,
                holder: held.get().id,
            }),
            Entry::Vacant(slot) => {
                let now = Instant::now();
                let lease = Lease {
                    id: LeaseId::new(),
                    node,
                    phase: LeasePhase::LeaseAcquired,
                    acquired_at: now,
                    expires_at: now + self.ttl,
                };
                slot.insert(lease.clone());
                tracing::debug!(node = %node, lease = %lease.id, "lease acquired");
                Ok(lease)
            }
        }
    }

    /// Moves a held lease to `phase`.
    ///
    /// Fails once the sweep has reclaimed the lease. Expiry alone does not
    /// revoke it: a holder that is still running may carry on until the
    /// sweep runs, and a lease in `Applying` is never swept.
    pub fn enter_phase(
        &self,
        node: NodeId,
        lease: LeaseId,
        phase: LeasePhase,
    ) -> Result<(), LeaseError> {
        match self.leases.get_mut(&node) {
            Some(mut held) if held.id == lease => {
                held.phase = phase;
                Ok(())
            }
            _ => Err(LeaseError::NotHeld { node, lease }),
        }
    }

    /// Releases `lease` if it is still the one held on `node`.
    pub fn release(&self, node: NodeId, lease: LeaseId) -> bool {
        let released = self.leases.remove_if(&node, |_, held| held.id == lease).is_some();
        if released {
            tracing::debug!(node = %node, lease = %lease, "lease released");
        }
        released
    }

    /// Runs `f` only if `lease` is still the one held on `node`, keeping the
    /// lease entry locked meanwhile so neither the sweep nor a new
    /// acquisition can interleave.
    pub fn while_held<R>(&self, node: NodeId, lease: LeaseId, f: impl FnOnce() -> R) -> Option<R> {
        let held = self.leases.get(&node)?;
        if held.id != lease {
            return None;
        }
        let out = f();
        drop(held);
        Some(out)
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Removes expired leases and returns them.
    ///
    /// Leases in `Applying` are skipped: the holder is inside a short
    /// synchronous commit and releases them itself.
    pub fn sweep_expired(&self) -> Vec<Lease> {
        let now = Instant::now();
        let expired: Vec<NodeId> = self
            .leases
            .iter()
            .filter(|l| l.expires_at <= now && l.phase != LeasePhase::Applying)
            .map(|l| *l.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|node| {
                self.leases
                    .remove_if(&node, |_, l| l.expires_at <= now && l.phase != LeasePhase::Applying)
                    .map(|(_, lease)| lease)
            })
            .collect()
    }

    /// Held leases ordered by node id.
    pub fn status(&self) -> Vec<LeaseStatusEntry> {
        let now = Instant::now();
        let mut entries: Vec<LeaseStatusEntry> = self
            .leases
            .iter()
            .map(|l| LeaseStatusEntry {
                node_id: l.node,
                lease_id: l.id,
                phase: l.phase,
                held_for_ms: now.saturating_duration_since(l.acquired_at).as_millis() as u64,
                expires_at: format_expiry(l.expires_at),
            })
            .collect();
        entries.sort_by_key(|e| e.node_id);
        entries
    }

    /// Spawns the periodic sweep. Each reclaimed lease's node is reverted
    /// to Stale and the change is published.
    pub fn start_expiry_sweep(
        self: &Arc<Self>,
        graph: Arc<CourseGraph>,
        notifier: Notifier,
        interval: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let expired = manager.sweep_expired();
                for lease in &expired {
                    tracing::warn!(
                        node = %lease.node,
                        lease = %lease.id,
                        phase = ?lease.phase,
                        "lease expired"
                    );
                    if let Some(event) = graph.revert_to_stale(lease.node) {
                        notifier.publish(event);
                    }
                }
                if !expired.is_empty() {
                    tracing::info!("Swept {} expired lease(s)", expired.len());
                }
            }
        })
    }
}

/// Seconds since the Unix epoch at which `expires_at` falls, or "expired".
fn format_expiry(expires_at: Instant) -> String {
    let now = Instant::now();
    if expires_at <= now {
        return "expired".to_string();
    }
    let at = SystemTime::now() + (expires_at - now);
    match at.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => format!("{}", d.as_secs()),
        Err(_) => "unknown".to_string(),
    }
}
