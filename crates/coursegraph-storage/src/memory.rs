//! In-memory implementation of [`CourseStore`].
//!
//! [`InMemoryStore`] keeps the same rows as the SQLite backend in ordered
//! maps. It backs tests and ephemeral server instances.

use std::collections::{BTreeMap, HashMap};

use coursegraph_core::graph::CourseSnapshot;

use crate::convert::{
    content_body, decompose, edge_row, node_row, recompose, DecomposedCourse, EdgeRow, NodeRow,
};
use crate::dirty::DirtySet;
use crate::error::StorageError;
use crate::traits::CourseStore;
use crate::types::{CourseId, CourseSummary};

#[derive(Debug, Clone, Default)]
struct StoredCourse {
    name: String,
    nodes: BTreeMap<u32, NodeRow>,
    contents: BTreeMap<String, String>,
    edges: BTreeMap<u32, EdgeRow>,
}

impl StoredCourse {
    fn new(name: &str) -> Self {
        StoredCourse {
            name: name.to_string(),
            ..StoredCourse::default()
        }
    }

    fn store_decomposed(&mut self, decomposed: DecomposedCourse) {
        self.nodes = decomposed.nodes.into_iter().map(|r| (r.node_id, r)).collect();
        self.contents = decomposed.contents;
        self.edges = decomposed.edges.into_iter().map(|r| (r.edge_id, r)).collect();
    }

    fn to_decomposed(&self) -> DecomposedCourse {
        DecomposedCourse {
            nodes: self.nodes.values().cloned().collect(),
            contents: self.contents.clone(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    /// Drops content bodies no node row references.
    fn prune_contents(&mut self) {
        let referenced: std::collections::HashSet<&String> =
            self.nodes.values().map(|n| &n.content_hash).collect();
        self.contents.retain(|hash, _| referenced.contains(hash));
    }
}

/// In-memory course store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    courses: HashMap<CourseId, StoredCourse>,
    next_course_id: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            courses: HashMap::new(),
            next_course_id: 1,
        }
    }

    fn course_mut(&mut self, id: CourseId) -> Result<&mut StoredCourse, StorageError> {
        self.courses
            .get_mut(&id)
            .ok_or(StorageError::CourseNotFound(id.0))
    }
}

impl CourseStore for InMemoryStore {
    fn create_course(&mut self, name: &str) -> Result<CourseId, StorageError> {
        let id = CourseId(self.next_course_id.max(1));
        self.next_course_id = id.0 + 1;
        self.courses.insert(id, StoredCourse::new(name));
        Ok(id)
    }

    fn list_courses(&self) -> Result<Vec<CourseSummary>, StorageError> {
        let mut out: Vec<CourseSummary> = self
            .courses
            .iter()
            .map(|(id, c)| CourseSummary {
                id: *id,
                name: c.name.clone(),
            })
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn delete_course(&mut self, id: CourseId) -> Result<(), StorageError> {
        self.courses
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::CourseNotFound(id.0))
    }

    fn save_course(&mut self, id: CourseId, snapshot: &CourseSnapshot) -> Result<(), StorageError> {
        let decomposed = decompose(snapshot)?;
        self.course_mut(id)?.store_decomposed(decomposed);
        Ok(())
    }

    fn load_course(&self, id: CourseId) -> Result<CourseSnapshot, StorageError> {
        let course = self
            .courses
            .get(&id)
            .ok_or(StorageError::CourseNotFound(id.0))?;
        recompose(course.to_decomposed())
    }

    fn apply_dirty(
        &mut self,
        id: CourseId,
        snapshot: &CourseSnapshot,
        dirty: &DirtySet,
    ) -> Result<(), StorageError> {
        let course = self.course_mut(id)?;
        let to_write = dirty.nodes_to_write();

        for record in snapshot.nodes.iter().filter(|r| to_write.contains(&r.id)) {
            course
                .contents
                .insert(record.content_hash.to_hex(), content_body(&record.content)?);
            course.nodes.insert(record.id.0, node_row(record));
        }
        for edge in snapshot.edges.iter().filter(|e| dirty.edges_added.contains(&e.id)) {
            course.edges.insert(edge.id.0, edge_row(edge, None));
        }
        for retired in snapshot
            .retired
            .iter()
            .filter(|r| dirty.edges_retired.contains(&r.edge.id))
        {
            course
                .edges
                .insert(retired.edge.id.0, edge_row(&retired.edge, Some(retired.retired_at_ms)));
        }
        course.prune_contents();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_core::edge::EdgeType;
    use coursegraph_core::graph::CourseGraph;
    use coursegraph_core::node::{Content, NodeKind, NodeState};

    use crate::dirty::{compute_dirty_set, PersistedStamps};

    #[test]
    fn create_and_list_courses() {
        let mut store = InMemoryStore::new();
        let a = store.create_course("Algebra").unwrap();
        let b = store.create_course("Biology").unwrap();
        let names: Vec<String> =
            store.list_courses().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Algebra", "Biology"]);
        assert_ne!(a, b);

        store.delete_course(a).unwrap();
        assert_eq!(store.list_courses().unwrap().len(), 1);
        assert!(matches!(
            store.delete_course(a),
            Err(StorageError::CourseNotFound(_))
        ));
    }

    #[test]
    fn save_then_load_graph() {
        let mut store = InMemoryStore::new();
        let course = store.create_course("Rust").unwrap();
        let graph = CourseGraph::new();
        let lo = graph.add_node(NodeKind::LearningObjective, Content::text("ownership")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, Content::text("borrowing")).id;
        graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        graph.begin_regeneration(cb).unwrap();

        store.save_course(course, &graph.snapshot()).unwrap();
        let loaded = store.load_graph(course).unwrap();
        assert_eq!(loaded.edges(), graph.edges());
        assert_eq!(loaded.get_node(cb).unwrap().state, NodeState::Stale);
    }

    #[test]
    fn apply_dirty_matches_full_save() {
        let mut store = InMemoryStore::new();
        let course = store.create_course("Rust").unwrap();
        let graph = CourseGraph::new();
        let lo = graph.add_node(NodeKind::LearningObjective, Content::text("v0")).id;
        let snapshot = graph.snapshot();
        store.save_course(course, &snapshot).unwrap();
        let stamps = PersistedStamps::from_snapshot(&snapshot);

        let cb = graph.add_node(NodeKind::ContentBlock, Content::text("cb")).id;
        graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        graph.mutate_node(lo, 0, Content::text("v1")).unwrap();
        let snapshot = graph.snapshot();
        let dirty = compute_dirty_set(&snapshot, &stamps);
        store.apply_dirty(course, &snapshot, &dirty).unwrap();

        assert_eq!(store.load_course(course).unwrap(), snapshot);
        let stored = &store.courses[&course];
        assert_eq!(stored.contents.len(), 2);
    }

    #[test]
    fn unknown_course_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.load_course(CourseId(42)),
            Err(StorageError::CourseNotFound(42))
        ));
    }
}
