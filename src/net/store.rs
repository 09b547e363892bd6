//! SQLite-backed persistence gateway.
//!
//! Records session lifecycle and periodic snapshots — no business logic.
//! `SQLite` runs in WAL mode so reads don't block the write path; the
//! connection sits behind a `std::sync::Mutex` and callers are expected to
//! issue these calls outside the coordinator's in-memory lock.

// SQLite returns i64 for counts and row ids; the values stored here are
// always non-negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from the persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A node's durable lifetime record, as read back from the `nodes` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub node_id: String,
    pub wallet: Option<String>,
    pub fingerprint: String,
    pub first_connected: f64,
    pub last_connected: f64,
    pub total_points: u64,
    pub total_time_connected: f64,
    pub connection_count: u64,
}

/// Durable storage handle. Cheap to clone; all clones share one connection.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    conn: Arc<Mutex<Connection>>,
}

impl NetworkStore {
    /// Open or create the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upsert the node's lifetime record on connect: first connection
    /// inserts the row, reconnection bumps `last_connected` and
    /// `connection_count`.
    pub fn upsert_node(
        &self,
        node_id: &str,
        wallet: Option<&str>,
        fingerprint: &str,
        now: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO nodes (node_id, wallet, fingerprint, first_connected, last_connected, connection_count)
             VALUES (?1, ?2, ?3, ?4, ?4, 1)
             ON CONFLICT(node_id) DO UPDATE SET
                 last_connected = ?4,
                 connection_count = connection_count + 1",
            params![node_id, wallet, fingerprint, now],
        )?;
        Ok(())
    }

    /// Open a session row for a fresh connection.
    pub fn open_session(&self, node_id: &str, now: f64, harmony: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (node_id, connected_at, points_earned, avg_harmony)
             VALUES (?1, ?2, 0, ?3)",
            params![node_id, now, harmony],
        )?;
        Ok(())
    }

    /// Close the most recent open session row for this node with its final
    /// credit and harmony.
    pub fn close_session(
        &self,
        node_id: &str,
        now: f64,
        points: u64,
        harmony: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET
                 disconnected_at = ?1,
                 points_earned = ?2,
                 avg_harmony = ?3
             WHERE id = (
                 SELECT MAX(id) FROM sessions
                 WHERE node_id = ?4 AND disconnected_at IS NULL
             )",
            params![now, points as i64, harmony, node_id],
        )?;
        Ok(())
    }

    /// Fold a finished session's credit and duration into the node's
    /// lifetime totals.
    pub fn accumulate_node_totals(
        &self,
        node_id: &str,
        points: u64,
        duration: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE nodes SET
                 total_points = total_points + ?1,
                 total_time_connected = total_time_connected + ?2
             WHERE node_id = ?3",
            params![points as i64, duration, node_id],
        )?;
        Ok(())
    }

    /// Append a network-wide stats snapshot row.
    pub fn append_stats(
        &self,
        now: f64,
        node_count: usize,
        collective_phi: f64,
        total_points: u64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO network_stats (timestamp, node_count, collective_phi, total_points)
             VALUES (?1, ?2, ?3, ?4)",
            params![now, node_count as i64, collective_phi, total_points as i64],
        )?;
        Ok(())
    }

    /// Read back a node's lifetime record.
    pub fn node_record(&self, node_id: &str) -> Result<Option<NodeRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT node_id, wallet, fingerprint, first_connected, last_connected,
                        total_points, total_time_connected, connection_count
                 FROM nodes WHERE node_id = ?1",
                params![node_id],
                |row| {
                    Ok(NodeRecord {
                        node_id: row.get(0)?,
                        wallet: row.get(1)?,
                        fingerprint: row.get(2)?,
                        first_connected: row.get(3)?,
                        last_connected: row.get(4)?,
                        total_points: row.get::<_, i64>(5)? as u64,
                        total_time_connected: row.get(6)?,
                        connection_count: row.get::<_, i64>(7)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Count of open (not yet disconnected) session rows for a node.
    pub fn open_session_count(&self, node_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE node_id = ?1 AND disconnected_at IS NULL",
            params![node_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Total points recorded across this node's closed sessions.
    pub fn session_points_total(&self, node_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(points_earned), 0) FROM sessions
             WHERE node_id = ?1 AND disconnected_at IS NOT NULL",
            params![node_id],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    /// Number of stats snapshot rows.
    pub fn stats_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM network_stats", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
