//! The [`CourseStore`] trait defining the storage contract for courses.
//!
//! Two write paths:
//! - `save_course` overwrites a whole course from a snapshot.
//! - `apply_dirty` upserts only the rows named by a [`DirtySet`], which is
//!   how the server flushes after each mutation.
//!
//! Both backends implement this trait with identical semantics, so they are
//! swappable without touching the orchestrator.

use coursegraph_core::graph::{CourseGraph, CourseSnapshot};

use crate::dirty::DirtySet;
use crate::error::StorageError;
use crate::types::{CourseId, CourseSummary};

/// The storage contract for course graphs.
///
/// Synchronous by design: callers on an async runtime hold the store behind
/// a mutex and keep each call short.
pub trait CourseStore {
    /// Creates a new empty course and returns its id.
    fn create_course(&mut self, name: &str) -> Result<CourseId, StorageError>;

    fn list_courses(&self) -> Result<Vec<CourseSummary>, StorageError>;

    /// Deletes a course with all its nodes, edges, and content.
    fn delete_course(&mut self, id: CourseId) -> Result<(), StorageError>;

    /// Overwrites the stored course with `snapshot`.
    fn save_course(&mut self, id: CourseId, snapshot: &CourseSnapshot) -> Result<(), StorageError>;

    /// Loads the persisted rows of a course as a snapshot, exactly as stored.
    fn load_course(&self, id: CourseId) -> Result<CourseSnapshot, StorageError>;

    /// Writes only the rows named by `dirty`, reading their current values
    /// from `snapshot`.
    fn apply_dirty(
        &mut self,
        id: CourseId,
        snapshot: &CourseSnapshot,
        dirty: &DirtySet,
    ) -> Result<(), StorageError>;

    /// Loads a course and rebuilds its live graph, re-checking invariants.
    fn load_graph(&self, id: CourseId) -> Result<CourseGraph, StorageError> {
        let snapshot = self.load_course(id)?;
        CourseGraph::from_snapshot(snapshot).map_err(|e| StorageError::ReconstructionError {
            reason: e.to_string(),
        })
    }
}
