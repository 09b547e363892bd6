//! Connection registry — the live session table.
//!
//! One [`NodeSession`] plus one [`NodeHandle`] per connected node, keyed by
//! node id. The two maps move in lockstep: a session is registered iff its
//! outbound handle is. All mutation happens under the coordinator's write
//! lock; readers work from [`NodeRegistry::snapshot`] copies so an in-flight
//! send pass never observes a half-applied change.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use super::wire::ServerFrame;

/// A connected node's in-memory session record.
#[derive(Debug, Clone)]
pub struct NodeSession {
    /// Derived identity: 16 lowercase hex chars.
    pub node_id: String,
    /// Opaque client-supplied wallet string, not validated.
    pub wallet: Option<String>,
    /// Opaque client-supplied correlation string, kept for audit only.
    pub fingerprint: String,
    /// Unix seconds at registration.
    pub connected_at: f64,
    /// Unix seconds of the most recent heartbeat.
    pub last_heartbeat: f64,
    /// Client-reported quality metric. Last reported value wins.
    pub harmony: f64,
    /// Always `harmony × 0.1`, recomputed on every harmony change.
    pub phi_contribution: f64,
    /// Credit accrued this session. Never decreases.
    pub points: u64,
}

/// Handle to push frames to a connected node from other tasks.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub node_id: String,
    pub addr: SocketAddr,
    pub tx: mpsc::UnboundedSender<ServerFrame>,
}

/// Two sessions claimed the same node id. The derivation embeds a wall-clock
/// timestamp, so this should never fire in practice; the coordinator treats
/// it as a logged anomaly and lets the last writer win.
#[derive(Debug, thiserror::Error)]
#[error("node id already registered: {0}")]
pub struct DuplicateIdentity(pub String);

/// Live session table. Registration order is preserved so snapshot-based
/// sorts have a deterministic tie order (earliest connection first).
#[derive(Debug, Default)]
pub struct NodeRegistry {
    sessions: HashMap<String, NodeSession>,
    handles: HashMap<String, NodeHandle>,
    order: Vec<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with its outbound handle.
    ///
    /// Fails with [`DuplicateIdentity`] when the node id is already present;
    /// the existing entry is left untouched.
    pub fn add(&mut self, session: NodeSession, handle: NodeHandle) -> Result<(), DuplicateIdentity> {
        if self.sessions.contains_key(&session.node_id) {
            return Err(DuplicateIdentity(session.node_id.clone()));
        }
        self.order.push(session.node_id.clone());
        self.handles.insert(session.node_id.clone(), handle);
        self.sessions.insert(session.node_id.clone(), session);
        Ok(())
    }

    /// Replace whatever is registered under this session's node id.
    /// Returns the displaced session, if any.
    pub fn replace(&mut self, session: NodeSession, handle: NodeHandle) -> Option<NodeSession> {
        let displaced = self.remove(&session.node_id);
        // add() cannot collide after the remove.
        let _ = self.add(session, handle);
        displaced
    }

    /// Remove a node. No-op (returns `None`) when absent.
    pub fn remove(&mut self, node_id: &str) -> Option<NodeSession> {
        let session = self.sessions.remove(node_id)?;
        self.handles.remove(node_id);
        self.order.retain(|id| id != node_id);
        Some(session)
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeSession> {
        self.sessions.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut NodeSession> {
        self.sessions.get_mut(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.sessions.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of every session, in registration order.
    pub fn snapshot(&self) -> Vec<NodeSession> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect()
    }

    /// Copies of every outbound handle, in registration order.
    pub fn handles(&self) -> Vec<NodeHandle> {
        self.order
            .iter()
            .filter_map(|id| self.handles.get(id).cloned())
            .collect()
    }
}
