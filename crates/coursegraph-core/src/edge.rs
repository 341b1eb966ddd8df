//! Typed relations between course nodes.
//!
//! Each [`EdgeType`] carries two policies: which endpoint kinds it may join,
//! and whether a change at its `to` endpoint makes the `from` endpoint stale.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::{EdgeId, NodeId};
use crate::node::NodeKind;

/// Relation types between course nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Structural containment (module -> lesson, outcome -> objective).
    ParentOf,
    /// The `from` node is written to satisfy the `to` node.
    AlignsTo,
    /// An assessment item verifies a learning objective.
    Assesses,
    /// The `from` node must be learned before the `to` node.
    PrerequisiteFor,
}

impl EdgeType {
    pub const ALL: [EdgeType; 4] = [
        EdgeType::ParentOf,
        EdgeType::AlignsTo,
        EdgeType::Assesses,
        EdgeType::PrerequisiteFor,
    ];

    /// Endpoint-kind legality table.
    pub fn legal_endpoints(self, from: NodeKind, to: NodeKind) -> bool {
        use NodeKind::*;
        match self {
            EdgeType::ParentOf => from.rank() <= to.rank(),
            EdgeType::AlignsTo => matches!(
                (from, to),
                (ContentBlock, LearningObjective)
                    | (LearningObjective, CourseOutcome)
                    | (CourseOutcome, ProgramOutcome)
            ),
            EdgeType::Assesses => matches!((from, to), (AssessmentItem, LearningObjective)),
            EdgeType::PrerequisiteFor => matches!(
                (from, to),
                (LearningObjective, LearningObjective) | (ContentBlock, ContentBlock)
            ),
        }
    }

    /// Returns `true` if a change at `to` invalidates `from`.
    pub fn is_stale_producing(self) -> bool {
        matches!(self, EdgeType::AlignsTo | EdgeType::Assesses)
    }

    /// Returns `true` if adding or retiring the edge bumps the `from` node's
    /// version.
    pub fn is_version_relevant(self) -> bool {
        self.is_stale_producing()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::ParentOf => "PARENT_OF",
            EdgeType::AlignsTo => "ALIGNS_TO",
            EdgeType::Assesses => "ASSESSES",
            EdgeType::PrerequisiteFor => "PREREQUISITE_FOR",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PARENT_OF" => Ok(EdgeType::ParentOf),
            "ALIGNS_TO" => Ok(EdgeType::AlignsTo),
            "ASSESSES" => Ok(EdgeType::Assesses),
            "PREREQUISITE_FOR" => Ok(EdgeType::PrerequisiteFor),
            other => Err(format!("unknown edge type: {other}")),
        }
    }
}

/// A live edge as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: EdgeType,
}

/// An edge removed together with a tombstoned endpoint, kept for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredEdge {
    pub edge: EdgeRecord,
    pub retired_at_ms: u64,
}
