//! Storage error types for coursegraph-storage.
//!
//! [`StorageError`] covers every failure mode of the storage layer: the
//! SQLite driver, schema migration, serialization, missing courses, and
//! stored data that no longer forms a consistent graph.

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite driver reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization of content failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A course with the given ID was not found.
    #[error("course not found: {0}")]
    CourseNotFound(i64),

    /// A stored row could not be decoded.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// Stored rows do not form a valid course graph.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}
