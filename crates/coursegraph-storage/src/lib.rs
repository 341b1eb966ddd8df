//! Storage for course graphs.
//!
//! Provides the [`CourseStore`] trait plus the [`InMemoryStore`] and
//! [`SqliteStore`] backends, the row conversion both share, and dirty
//! detection for incremental flushes.
//!
//! # Modules
//!
//! - [`error`]: StorageError
//! - [`types`]: CourseId, CourseSummary
//! - [`traits`]: CourseStore
//! - [`convert`]: snapshot decompose/recompose
//! - [`dirty`]: persisted stamps and dirty sets
//! - [`memory`]: InMemoryStore
//! - [`schema`]: connection setup and migrations
//! - [`sqlite`]: SqliteStore

pub mod convert;
pub mod dirty;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use dirty::{compute_dirty_set, DirtySet, NodeStamp, PersistedStamps};
pub use error::StorageError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::CourseStore;
pub use types::{CourseId, CourseSummary};
