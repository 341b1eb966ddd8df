//! Pedagogical node model.
//!
//! A node is one addressable unit of course structure. Its identity and kind
//! live in the graph topology; everything that changes over time (content,
//! version, staleness) lives in a [`NodeRecord`] owned by the graph store.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::hash::{hash_content, ContentHash};
use crate::id::NodeId;

// ---------------------------------------------------------------------------
// Kind and state
// ---------------------------------------------------------------------------

/// The pedagogical role of a node.
///
/// Kinds are ordered from broadest (program outcomes) to narrowest
/// (assessment items); the order drives `PARENT_OF` legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    ProgramOutcome,
    CourseOutcome,
    LearningObjective,
    ContentBlock,
    AssessmentItem,
}

impl NodeKind {
    /// Structural rank, 0 for program outcomes up to 4 for assessment items.
    pub fn rank(self) -> u8 {
        match self {
            NodeKind::ProgramOutcome => 0,
            NodeKind::CourseOutcome => 1,
            NodeKind::LearningObjective => 2,
            NodeKind::ContentBlock => 3,
            NodeKind::AssessmentItem => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::ProgramOutcome => "program_outcome",
            NodeKind::CourseOutcome => "course_outcome",
            NodeKind::LearningObjective => "learning_objective",
            NodeKind::ContentBlock => "content_block",
            NodeKind::AssessmentItem => "assessment_item",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "program_outcome" => Ok(NodeKind::ProgramOutcome),
            "course_outcome" => Ok(NodeKind::CourseOutcome),
            "learning_objective" => Ok(NodeKind::LearningObjective),
            "content_block" => Ok(NodeKind::ContentBlock),
            "assessment_item" => Ok(NodeKind::AssessmentItem),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Whether a node's content is known to satisfy its upstream dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Content was authored or regenerated against the current upstream.
    Fresh,
    /// An upstream dependency changed after the content was produced.
    Stale,
    /// A regeneration lease is held and the generator call is outstanding.
    Regenerating,
    /// Became stale while regenerating; the in-flight result must be dropped.
    Conflicted,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Fresh => "fresh",
            NodeState::Stale => "stale",
            NodeState::Regenerating => "regenerating",
            NodeState::Conflicted => "conflicted",
        }
    }

    /// Returns `true` for states that need attention before the node can be
    /// trusted (Stale and Conflicted).
    pub fn is_unverified(self) -> bool {
        matches!(self, NodeState::Stale | NodeState::Conflicted)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" => Ok(NodeState::Fresh),
            "stale" => Ok(NodeState::Stale),
            "regenerating" => Ok(NodeState::Regenerating),
            "conflicted" => Ok(NodeState::Conflicted),
            other => Err(format!("unknown node state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Opaque content payload owned by the author or the generator.
///
/// The graph never inspects the value; it only hashes it and estimates its
/// size for context budgeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(pub serde_json::Value);

impl Content {
    pub fn new(value: serde_json::Value) -> Self {
        Content(value)
    }

    /// Convenience constructor for plain-text content.
    pub fn text(text: impl Into<String>) -> Self {
        Content(serde_json::Value::String(text.into()))
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Canonical bytes used for hashing and size estimation.
    ///
    /// `serde_json::Map` is ordered by key unless `preserve_order` is
    /// enabled, so equal values always produce equal bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    /// Rough token count: one token per four bytes of canonical JSON.
    pub fn estimated_tokens(&self) -> usize {
        self.canonical_bytes().len().div_ceil(4).max(1)
    }

    /// Returns `true` when the payload carries nothing usable (null, an
    /// empty/blank string, or an empty array/object).
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.trim().is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Records and references
// ---------------------------------------------------------------------------

/// The upstream `(node, version)` whose change made a node stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamTrigger {
    pub node: NodeId,
    pub version: u64,
}

/// Mutable state of one node, owned by the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content: Content,
    pub content_hash: ContentHash,
    /// Bumped on every accepted content mutation and every version-relevant
    /// incident edge change. Never bumped by propagation.
    pub version: u64,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_upstream: Option<UpstreamTrigger>,
    /// Epoch milliseconds of the last content or state change.
    pub updated_at_ms: u64,
    #[serde(default)]
    pub tombstoned: bool,
}

impl NodeRecord {
    /// A freshly created node: `Fresh`, version 0.
    pub fn new(id: NodeId, kind: NodeKind, content: Content) -> Self {
        let content_hash = hash_content(&content);
        NodeRecord {
            id,
            kind,
            content,
            content_hash,
            version: 0,
            state: NodeState::Fresh,
            triggering_upstream: None,
            updated_at_ms: now_ms(),
            tombstoned: false,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id,
            kind: self.kind,
            version: self.version,
        }
    }

    /// Replaces the content, recomputing the hash and bumping the version.
    pub(crate) fn replace_content(&mut self, content: Content) {
        self.content_hash = hash_content(&content);
        self.content = content;
        self.bump();
    }

    /// Bumps the version and refreshes `updated_at_ms`.
    pub(crate) fn bump(&mut self) {
        self.version += 1;
        self.updated_at_ms = now_ms();
    }
}

/// Lightweight reference to a node at a known version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    pub kind: NodeKind,
    pub version: u64,
}

/// A node state transition, published to notification subscribers.
///
/// Delivery is at-least-once; consumers deduplicate on
/// `(node_id, version, new_state)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateEvent {
    pub node_id: NodeId,
    pub old_state: NodeState,
    pub new_state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_node_id: Option<NodeId>,
    pub version: u64,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_rank_follows_declaration_order() {
        assert!(NodeKind::ProgramOutcome.rank() < NodeKind::CourseOutcome.rank());
        assert!(NodeKind::LearningObjective.rank() < NodeKind::ContentBlock.rank());
        assert_eq!(NodeKind::AssessmentItem.rank(), 4);
    }

    #[test]
    fn kind_and_state_parse_their_display_form() {
        for kind in [
            NodeKind::ProgramOutcome,
            NodeKind::CourseOutcome,
            NodeKind::LearningObjective,
            NodeKind::ContentBlock,
            NodeKind::AssessmentItem,
        ] {
            assert_eq!(kind.to_string().parse::<NodeKind>().unwrap(), kind);
        }
        for state in [
            NodeState::Fresh,
            NodeState::Stale,
            NodeState::Regenerating,
            NodeState::Conflicted,
        ] {
            assert_eq!(state.to_string().parse::<NodeState>().unwrap(), state);
        }
        assert!("lesson".parse::<NodeKind>().is_err());
    }

    #[test]
    fn new_record_is_fresh_at_version_zero() {
        let record = NodeRecord::new(NodeId(0), NodeKind::ContentBlock, Content::text("intro"));
        assert_eq!(record.version, 0);
        assert_eq!(record.state, NodeState::Fresh);
        assert!(record.triggering_upstream.is_none());
        assert!(!record.tombstoned);
    }

    #[test]
    fn replace_content_rehashes_and_bumps() {
        let mut record = NodeRecord::new(NodeId(0), NodeKind::ContentBlock, Content::text("a"));
        let before = record.content_hash;
        record.replace_content(Content::text("b"));
        assert_eq!(record.version, 1);
        assert_ne!(record.content_hash, before);
    }

    #[test]
    fn estimated_tokens_never_zero() {
        assert_eq!(Content::text("").estimated_tokens(), 1);
        // "\"abcdefgh\"" is 10 bytes -> 3 tokens
        assert_eq!(Content::text("abcdefgh").estimated_tokens(), 3);
    }

    #[test]
    fn emptiness_checks() {
        assert!(Content::new(json!(null)).is_empty());
        assert!(Content::text("   ").is_empty());
        assert!(Content::new(json!({})).is_empty());
        assert!(!Content::new(json!({"body": "x"})).is_empty());
        assert!(!Content::new(json!(0)).is_empty());
    }
}
