//! Node state change notifications.
//!
//! [`Notifier`] fans [`NodeStateEvent`]s out over a `tokio::sync::broadcast`
//! channel. Publishing never waits on subscribers: a subscriber that falls
//! behind loses the oldest events and should re-poll node state.
//!
//! Delivery is at-least-once from a consumer's point of view, so consumers
//! filter repeats with a [`Deduplicator`].

use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::broadcast;

use coursegraph_core::id::NodeId;
use coursegraph_core::node::{NodeState, NodeStateEvent};

/// Broadcast publisher of node state events.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<NodeStateEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Notifier { sender }
    }

    /// Publishes one event. Returns the number of subscribers reached.
    pub fn publish(&self, event: NodeStateEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(
                    node = %event.node_id,
                    old = %event.old_state,
                    new = %event.new_state,
                    version = event.version,
                    receivers,
                    "state event published"
                );
                receivers
            }
            // No subscribers.
            Err(_) => 0,
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = NodeStateEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeStateEvent> {
        self.sender.subscribe()
    }
}

/// Receives the next event, skipping over any gap left by lagging.
///
/// Returns `None` once the channel is closed.
pub async fn next_event(
    receiver: &mut broadcast::Receiver<NodeStateEvent>,
) -> Option<NodeStateEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "state event subscriber lagged, re-poll node state");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Filters repeated deliveries of the same `(node, version, new_state)`.
///
/// Remembers a bounded number of recent keys.
#[derive(Debug)]
pub struct Deduplicator {
    seen: LruCache<(NodeId, u64, NodeState), ()>,
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Deduplicator {
            seen: LruCache::new(capacity),
        }
    }

    /// Returns `true` the first time an event key is seen.
    pub fn first_delivery(&mut self, event: &NodeStateEvent) -> bool {
        self.seen
            .put((event.node_id, event.version, event.new_state), ())
            .is_none()
    }
}
