//! SQLite implementation of [`CourseStore`].
//!
//! [`SqliteStore`] persists courses with WAL mode, one transaction per write
//! call, and automatic schema migrations. Content bodies are stored once per
//! distinct hash.

use rusqlite::{params, Connection, Transaction};

use coursegraph_core::graph::CourseSnapshot;
use coursegraph_core::node::NodeRecord;

use crate::convert::{
    content_body, decompose, edge_row, node_row, recompose, DecomposedCourse, EdgeRow, NodeRow,
};
use crate::dirty::DirtySet;
use crate::error::StorageError;
use crate::traits::CourseStore;
use crate::types::{CourseId, CourseSummary};

/// SQLite-backed implementation of [`CourseStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    fn assert_course_exists(&self, id: CourseId) -> Result<(), StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM courses WHERE id = ?1)",
            params![id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::CourseNotFound(id.0));
        }
        Ok(())
    }

    fn load_decomposed(&self, course_id: i64) -> Result<DecomposedCourse, StorageError> {
        let mut decomposed = DecomposedCourse::default();

        let mut stmt = self
            .conn
            .prepare_cached("SELECT hash, body FROM contents WHERE course_id = ?1")?;
        let rows = stmt.query_map(params![course_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (hash, body) = row?;
            decomposed.contents.insert(hash, body);
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id, kind, version, state, content_hash, trigger_node, trigger_version,
                    updated_at_ms, tombstoned
             FROM nodes WHERE course_id = ?1 ORDER BY node_id",
        )?;
        let rows = stmt.query_map(params![course_id], |row| {
            Ok(NodeRow {
                node_id: row.get(0)?,
                kind: row.get(1)?,
                version: row.get::<_, i64>(2)? as u64,
                state: row.get(3)?,
                content_hash: row.get(4)?,
                trigger_node: row.get(5)?,
                trigger_version: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
                updated_at_ms: row.get::<_, i64>(7)? as u64,
                tombstoned: row.get(8)?,
            })
        })?;
        for row in rows {
            decomposed.nodes.push(row?);
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT edge_id, from_node, to_node, edge_type, retired_at_ms
             FROM edges WHERE course_id = ?1 ORDER BY edge_id",
        )?;
        let rows = stmt.query_map(params![course_id], |row| {
            Ok(EdgeRow {
                edge_id: row.get(0)?,
                from_node: row.get(1)?,
                to_node: row.get(2)?,
                edge_type: row.get(3)?,
                retired_at_ms: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
            })
        })?;
        for row in rows {
            decomposed.edges.push(row?);
        }

        Ok(decomposed)
    }
}

fn insert_content(
    tx: &Transaction<'_>,
    course_id: i64,
    hash: &str,
    body: &str,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT OR IGNORE INTO contents (course_id, hash, body) VALUES (?1, ?2, ?3)",
        params![course_id, hash, body],
    )?;
    Ok(())
}

fn upsert_node(tx: &Transaction<'_>, course_id: i64, row: &NodeRow) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO nodes (course_id, node_id, kind, version, state, content_hash,
                            trigger_node, trigger_version, updated_at_ms, tombstoned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (course_id, node_id) DO UPDATE SET
            kind = excluded.kind,
            version = excluded.version,
            state = excluded.state,
            content_hash = excluded.content_hash,
            trigger_node = excluded.trigger_node,
            trigger_version = excluded.trigger_version,
            updated_at_ms = excluded.updated_at_ms,
            tombstoned = excluded.tombstoned",
        params![
            course_id,
            row.node_id,
            row.kind,
            row.version as i64,
            row.state,
            row.content_hash,
            row.trigger_node,
            row.trigger_version.map(|v| v as i64),
            row.updated_at_ms as i64,
            row.tombstoned,
        ],
    )?;
    Ok(())
}

fn upsert_edge(tx: &Transaction<'_>, course_id: i64, row: &EdgeRow) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO edges (course_id, edge_id, from_node, to_node, edge_type, retired_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (course_id, edge_id) DO UPDATE SET
            retired_at_ms = excluded.retired_at_ms",
        params![
            course_id,
            row.edge_id,
            row.from_node,
            row.to_node,
            row.edge_type,
            row.retired_at_ms.map(|v| v as i64),
        ],
    )?;
    Ok(())
}

fn write_node(
    tx: &Transaction<'_>,
    course_id: i64,
    record: &NodeRecord,
) -> Result<(), StorageError> {
    let row = node_row(record);
    insert_content(tx, course_id, &row.content_hash, &content_body(&record.content)?)?;
    upsert_node(tx, course_id, &row)
}

fn prune_contents(tx: &Transaction<'_>, course_id: i64) -> Result<(), StorageError> {
    tx.execute(
        "DELETE FROM contents WHERE course_id = ?1
           AND hash NOT IN (SELECT content_hash FROM nodes WHERE course_id = ?1)",
        params![course_id],
    )?;
    Ok(())
}

impl CourseStore for SqliteStore {
    fn create_course(&mut self, name: &str) -> Result<CourseId, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("INSERT INTO courses (name) VALUES (?1)", params![name])?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(course = id, name, "course created");
        Ok(CourseId(id))
    }

    fn list_courses(&self) -> Result<Vec<CourseSummary>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, name FROM courses ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(CourseSummary {
                id: CourseId(row.get(0)?),
                name: row.get(1)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn delete_course(&mut self, id: CourseId) -> Result<(), StorageError> {
        self.assert_course_exists(id)?;
        let tx = self.conn.transaction()?;
        // Children first so foreign keys hold after every statement.
        tx.execute("DELETE FROM edges WHERE course_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM nodes WHERE course_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM contents WHERE course_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM courses WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        tracing::info!(course = %id, "course deleted");
        Ok(())
    }

    fn save_course(&mut self, id: CourseId, snapshot: &CourseSnapshot) -> Result<(), StorageError> {
        self.assert_course_exists(id)?;
        let decomposed = decompose(snapshot)?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM edges WHERE course_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM nodes WHERE course_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM contents WHERE course_id = ?1", params![id.0])?;
        for (hash, body) in &decomposed.contents {
            insert_content(&tx, id.0, hash, body)?;
        }
        for row in &decomposed.nodes {
            upsert_node(&tx, id.0, row)?;
        }
        for row in &decomposed.edges {
            upsert_edge(&tx, id.0, row)?;
        }
        tx.commit()?;
        tracing::debug!(course = %id, nodes = decomposed.nodes.len(), "course saved");
        Ok(())
    }

    fn load_course(&self, id: CourseId) -> Result<CourseSnapshot, StorageError> {
        self.assert_course_exists(id)?;
        recompose(self.load_decomposed(id.0)?)
    }

    fn apply_dirty(
        &mut self,
        id: CourseId,
        snapshot: &CourseSnapshot,
        dirty: &DirtySet,
    ) -> Result<(), StorageError> {
        if dirty.is_clean() {
            return Ok(());
        }
        self.assert_course_exists(id)?;
        let to_write = dirty.nodes_to_write();
        let tx = self.conn.transaction()?;

        for record in snapshot.nodes.iter().filter(|r| to_write.contains(&r.id)) {
            write_node(&tx, id.0, record)?;
        }
        for edge in snapshot.edges.iter().filter(|e| dirty.edges_added.contains(&e.id)) {
            upsert_edge(&tx, id.0, &edge_row(edge, None))?;
        }
        for retired in snapshot
            .retired
            .iter()
            .filter(|r| dirty.edges_retired.contains(&r.edge.id))
        {
            upsert_edge(&tx, id.0, &edge_row(&retired.edge, Some(retired.retired_at_ms)))?;
        }
        prune_contents(&tx, id.0)?;
        tx.commit()?;

        tracing::debug!(course = %id, rows = dirty.total(), "dirty rows flushed");
        Ok(())
    }
}
