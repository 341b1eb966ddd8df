//! Storage-layer types for course identity and metadata.
//!
//! [`CourseId`] lives here rather than in coursegraph-core because a course
//! only gains an identity once it is persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a stored course. Aligns with SQLite's
/// `INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseId(pub i64);

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Summary of a stored course (for listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: CourseId,
    pub name: String,
}
