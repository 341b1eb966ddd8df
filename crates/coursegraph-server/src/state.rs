//! Application state shared by all handlers.
//!
//! [`AppState`] holds the course store behind a `tokio::sync::Mutex` and a
//! registry of live [`CourseService`]s. Courses are loaded lazily on first
//! access and stay resident until deleted. The store lock is held only for
//! short synchronous calls; graph operations never wait on it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use coursegraph_core::graph::CourseGraph;
use coursegraph_storage::{
    CourseId, CourseStore, CourseSummary, InMemoryStore, PersistedStamps, SqliteStore, StorageError,
};

use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::error::ApiError;
use crate::service::{CourseService, SharedStore};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// The course store (async Mutex, since `rusqlite::Connection` is `!Sync`).
    pub store: SharedStore,
    /// Live orchestrators by course.
    pub courses: Arc<DashMap<CourseId, Arc<CourseService>>>,
    pub config: Arc<OrchestratorConfig>,
    pub collaborators: Collaborators,
}

impl AppState {
    /// Creates an `AppState` backed by the SQLite database at `db_path`.
    pub fn new(
        db_path: &str,
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ApiError> {
        let store = SqliteStore::new(db_path)?;
        Ok(Self::with_store(Box::new(store), config, collaborators))
    }

    /// Creates an `AppState` with an in-memory SQLite database and no
    /// collaborators (for testing).
    pub fn in_memory() -> Result<Self, ApiError> {
        let store = SqliteStore::in_memory()?;
        Ok(Self::with_store(
            Box::new(store),
            OrchestratorConfig::default(),
            Collaborators::none(),
        ))
    }

    /// Creates an `AppState` over a plain in-memory store.
    pub fn ephemeral(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        Self::with_store(Box::new(InMemoryStore::new()), config, collaborators)
    }

    pub fn with_store(
        store: Box<dyn CourseStore + Send>,
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Self {
        AppState {
            store: Arc::new(tokio::sync::Mutex::new(store)),
            courses: Arc::new(DashMap::new()),
            config: Arc::new(config),
            collaborators,
        }
    }

    // -- Course registry -----------------------------------------------------

    pub async fn create_course(&self, name: &str) -> Result<CourseId, ApiError> {
        let id = self.store.lock().await.create_course(name)?;
        tracing::info!(course = %id, name, "course created");
        Ok(id)
    }

    pub async fn list_courses(&self) -> Result<Vec<CourseSummary>, ApiError> {
        Ok(self.store.lock().await.list_courses()?)
    }

    /// Unloads and deletes a course.
    pub async fn delete_course(&self, id: CourseId) -> Result<(), ApiError> {
        let mut store = self.store.lock().await;
        store.delete_course(id)?;
        self.courses.remove(&id);
        tracing::info!(course = %id, "course deleted");
        Ok(())
    }

    /// Returns the live orchestrator for `id`, loading it from the store on
    /// first access.
    pub async fn course(&self, id: CourseId) -> Result<Arc<CourseService>, ApiError> {
        if let Some(service) = self.courses.get(&id) {
            return Ok(Arc::clone(service.value()));
        }

        // Loads are serialized by the store lock, so a course is started once.
        let store = self.store.lock().await;
        if let Some(service) = self.courses.get(&id) {
            return Ok(Arc::clone(service.value()));
        }
        let snapshot = store.load_course(id)?;
        let stamps = PersistedStamps::from_snapshot(&snapshot);
        let graph =
            CourseGraph::from_snapshot(snapshot).map_err(|e| StorageError::ReconstructionError {
                reason: e.to_string(),
            })?;
        let service = Arc::new(CourseService::start(
            id,
            graph,
            stamps,
            &self.config,
            self.collaborators.clone(),
        ));
        self.courses.insert(id, Arc::clone(&service));
        drop(store);
        Ok(service)
    }

    // -- Persistence ---------------------------------------------------------

    /// Flushes one course after a mutating request. A failure is logged and
    /// left to the periodic flush to retry.
    pub async fn persist(&self, course: &CourseService) {
        if let Err(err) = course.persist(&self.store).await {
            tracing::error!(course = %course.id(), error = %err, "flush failed");
        }
    }

    /// Flushes every loaded course. Returns the number of rows written.
    pub async fn flush_all(&self) -> Result<usize, StorageError> {
        let loaded: Vec<Arc<CourseService>> =
            self.courses.iter().map(|s| Arc::clone(s.value())).collect();
        let mut written = 0;
        for course in loaded {
            written += course.persist(&self.store).await?;
        }
        Ok(written)
    }

    /// Spawns the periodic flush of all loaded courses.
    pub fn start_flush_task(&self, interval: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                match state.flush_all().await {
                    Ok(0) => {}
                    Ok(written) => tracing::debug!(rows = written, "periodic flush"),
                    Err(err) => tracing::error!(error = %err, "periodic flush failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_core::node::{Content, NodeKind, NodeState};

    #[tokio::test]
    async fn courses_load_lazily_and_once() {
        let state = AppState::in_memory().unwrap();
        let id = state.create_course("algebra").await.unwrap();
        assert!(state.courses.is_empty());

        let first = state.course(id).await.unwrap();
        let second = state.course(id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(state.courses.len(), 1);
    }

    #[tokio::test]
    async fn unknown_course_is_not_found() {
        let state = AppState::in_memory().unwrap();
        assert!(matches!(state.course(CourseId(42)).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn reload_after_flush_restores_graph() {
        let state = AppState::ephemeral(OrchestratorConfig::default(), Collaborators::none());
        let id = state.create_course("c").await.unwrap();
        let course = state.course(id).await.unwrap();
        let lo = course.add_node(NodeKind::LearningObjective, Content::text("lo")).unwrap().id;
        course.graph().begin_regeneration(lo).unwrap();
        state.persist(&course).await;

        state.courses.clear();
        let reloaded = state.course(id).await.unwrap();
        assert!(!Arc::ptr_eq(&course, &reloaded));
        assert_eq!(reloaded.get_node(lo).unwrap().state, NodeState::Stale);
        assert_eq!(state.flush_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_unloads_course() {
        let state = AppState::in_memory().unwrap();
        let id = state.create_course("c").await.unwrap();
        state.course(id).await.unwrap();
        state.delete_course(id).await.unwrap();
        assert!(state.courses.is_empty());
        assert!(state.list_courses().await.unwrap().is_empty());
    }
}
