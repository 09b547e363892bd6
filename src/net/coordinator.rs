//! Network coordinator — shared state and the operations that mutate it.
//!
//! All connection handlers and both background tickers share one
//! [`NetworkState`] behind a single `RwLock`; the registry and the two
//! process-lifetime counters form one critical section. Mutating
//! operations take the write lock, snapshot whatever they need, release
//! it, and only then perform storage I/O and aggregate math. A slow
//! database write for one connection never blocks another connection's
//! registry access.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::metrics::{BROADCASTS, HEARTBEATS, NODES_ACTIVE, NODES_PEAK, POINTS_DISTRIBUTED};
use super::now_secs;
use super::registry::{NodeHandle, NodeRegistry, NodeSession};
use super::scoring;
use super::store::NetworkStore;
use super::wire::{
    mask_node_id, mask_wallet, LeaderboardEntry, NetworkStateView, NodeStateFrame, NodeStateView,
    ServerFrame,
};

/// How many leaderboard rows a request returns.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Shared coordinator state — one per process.
pub type SharedState = Arc<RwLock<NetworkState>>;

/// The node network: live registry plus process-lifetime counters.
///
/// The counters are initialized at process start, never reset, and are
/// persisted only through the periodic stats snapshot.
#[derive(Debug)]
pub struct NetworkState {
    pub registry: NodeRegistry,
    /// Highest concurrent node count ever observed. Monotonic.
    pub peak_node_count: usize,
    /// Total credit handed out across all nodes. Monotonic.
    pub total_points_distributed: u64,
    /// Unix seconds at process start.
    pub started_at: f64,
    store: NetworkStore,
}

impl NetworkState {
    pub fn new(store: NetworkStore) -> Self {
        Self {
            registry: NodeRegistry::new(),
            peak_node_count: 0,
            total_points_distributed: 0,
            started_at: now_secs(),
            store,
        }
    }

    pub fn shared(store: NetworkStore) -> SharedState {
        Arc::new(RwLock::new(Self::new(store)))
    }

    pub fn store(&self) -> NetworkStore {
        self.store.clone()
    }
}

/// Derive a node id from the client fingerprint, optional wallet, and the
/// current wall-clock time: first 16 hex chars of
/// `SHA-256("{fingerprint}:{wallet|anonymous}:{now}")`.
///
/// The embedded timestamp means a reconnecting client almost always mints
/// a fresh id, so lifetime records key on connection instances rather than
/// physical clients.
pub fn derive_node_id(fingerprint: &str, wallet: Option<&str>, now: f64) -> String {
    let data = format!("{fingerprint}:{}:{now}", wallet.unwrap_or("anonymous"));
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Build the aggregate view from a snapshot plus the counters copied out
/// with it. Runs without the lock.
fn build_view(
    snapshot: &[NodeSession],
    peak_nodes: usize,
    total_points: u64,
    started_at: f64,
) -> NetworkStateView {
    NetworkStateView {
        node_count: snapshot.len(),
        collective_phi: scoring::collective_phi(snapshot),
        peak_nodes,
        total_points_distributed: total_points,
        uptime: now_secs() - started_at,
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Current aggregate view, computed from a consistent snapshot.
pub async fn network_view(state: &SharedState) -> NetworkStateView {
    let (snapshot, peak, total, started_at) = {
        let st = state.read().await;
        (
            st.registry.snapshot(),
            st.peak_node_count,
            st.total_points_distributed,
            st.started_at,
        )
    };
    build_view(&snapshot, peak, total, started_at)
}

/// Register a new node connection and broadcast the updated aggregate
/// state to everyone (the new node included). Returns the derived node id.
pub async fn connect_node(
    state: &SharedState,
    fingerprint: String,
    wallet: Option<String>,
    harmony: f64,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<ServerFrame>,
) -> String {
    let now = now_secs();
    let node_id = derive_node_id(&fingerprint, wallet.as_deref(), now);

    let session = NodeSession {
        node_id: node_id.clone(),
        wallet: wallet.clone(),
        fingerprint: fingerprint.clone(),
        connected_at: now,
        last_heartbeat: now,
        harmony,
        phi_contribution: harmony * scoring::PHI_COEFFICIENT,
        points: 0,
    };
    let handle = NodeHandle {
        node_id: node_id.clone(),
        addr,
        tx,
    };

    let (node_count, store) = {
        let mut st = state.write().await;
        if st.registry.add(session.clone(), handle.clone()).is_err() {
            // Derivation embeds a timestamp, so a collision between two
            // open sessions is an anomaly. Last writer wins; the displaced
            // session is dropped without a persistence flush.
            warn!(node = %mask_node_id(&node_id), "node id collision — replacing existing session");
            st.registry.replace(session, handle);
        }
        if st.registry.len() > st.peak_node_count {
            st.peak_node_count = st.registry.len();
            gauge!(NODES_PEAK).set(st.peak_node_count as f64);
        }
        gauge!(NODES_ACTIVE).set(st.registry.len() as f64);
        (st.registry.len(), st.store())
    };

    // Durable writes happen off the lock.
    if let Err(e) = store.upsert_node(&node_id, wallet.as_deref(), &fingerprint, now) {
        warn!(node = %mask_node_id(&node_id), error = %e, "failed to persist node record");
    }
    if let Err(e) = store.open_session(&node_id, now, harmony) {
        warn!(node = %mask_node_id(&node_id), error = %e, "failed to open session record");
    }

    info!(node = %mask_node_id(&node_id), total = node_count, "node connected");

    broadcast_state(state).await;
    node_id
}

/// Process a heartbeat: refresh liveness, accrue credit, and return the
/// node's merged state frame. Heartbeats for unknown ids are dropped
/// silently (`None`), not errored.
pub async fn process_heartbeat(
    state: &SharedState,
    node_id: &str,
    harmony: Option<f64>,
) -> Option<NodeStateFrame> {
    let now = now_secs();

    let (snapshot, peak, total, started_at) = {
        let mut st = state.write().await;
        let session = st.registry.get_mut(node_id)?;
        session.last_heartbeat = now;

        let credit = scoring::accrue(session, harmony);
        session.points += credit;
        st.total_points_distributed += credit;
        counter!(HEARTBEATS).increment(1);
        counter!(POINTS_DISTRIBUTED).increment(credit);

        (
            st.registry.snapshot(),
            st.peak_node_count,
            st.total_points_distributed,
            st.started_at,
        )
    };

    // Aggregate math and ranking run on the copy, off the lock.
    let session = snapshot.iter().find(|s| s.node_id == node_id)?;
    let node = NodeStateView {
        node_id: session.node_id.clone(),
        points: session.points,
        phi_contribution: session.phi_contribution,
        harmony: session.harmony,
        connected_duration: now - session.connected_at,
        rank: scoring::rank(&snapshot, node_id),
    };
    let network = build_view(&snapshot, peak, total, started_at);
    Some(NodeStateFrame { node, network })
}

/// Remove a node and flush its terminal state to durable storage.
///
/// Idempotent: returns `false` without side effects when the id is not
/// registered, so concurrent teardown triggers (handler exit, broadcast
/// failure) collapse to one. Does NOT broadcast; callers that tear down
/// outside a broadcast pass follow up with [`broadcast_state`].
pub async fn teardown_node(state: &SharedState, node_id: &str) -> bool {
    let now = now_secs();

    let (session, store) = {
        let mut st = state.write().await;
        let Some(session) = st.registry.remove(node_id) else {
            return false;
        };
        gauge!(NODES_ACTIVE).set(st.registry.len() as f64);
        (session, st.store())
    };

    let duration = now - session.connected_at;
    if let Err(e) = store.accumulate_node_totals(&session.node_id, session.points, duration) {
        warn!(node = %mask_node_id(node_id), error = %e, "failed to accumulate node totals");
    }
    if let Err(e) = store.close_session(&session.node_id, now, session.points, session.harmony) {
        warn!(node = %mask_node_id(node_id), error = %e, "failed to close session record");
    }

    info!(
        node = %mask_node_id(node_id),
        points = session.points,
        duration_secs = duration,
        "node disconnected"
    );
    true
}

/// Graceful disconnect: teardown plus a broadcast to the remaining nodes.
pub async fn disconnect_node(state: &SharedState, node_id: &str) {
    if teardown_node(state, node_id).await {
        broadcast_state(state).await;
    }
}

/// Broadcast the aggregate state to every open connection.
///
/// Each pass iterates an owned snapshot of the handles; send failures are
/// collected and their nodes torn down only after the pass completes, then
/// the pass repeats against the updated registry until it finishes clean.
/// A teardown never re-enters an in-flight pass.
pub async fn broadcast_state(state: &SharedState) {
    loop {
        let (snapshot, handles, peak, total, started_at) = {
            let st = state.read().await;
            (
                st.registry.snapshot(),
                st.registry.handles(),
                st.peak_node_count,
                st.total_points_distributed,
                st.started_at,
            )
        };
        if handles.is_empty() {
            return;
        }

        let frame = ServerFrame::NetworkState {
            network: build_view(&snapshot, peak, total, started_at),
        };

        let mut dead = Vec::new();
        for handle in handles {
            if handle.tx.send(frame.clone()).is_err() {
                dead.push(handle);
            }
        }
        counter!(BROADCASTS).increment(1);

        if dead.is_empty() {
            return;
        }
        for handle in dead {
            debug!(
                node = %mask_node_id(&handle.node_id),
                addr = %handle.addr,
                "send channel closed — tearing down"
            );
            teardown_node(state, &handle.node_id).await;
        }
        // Re-broadcast so the survivors see the reduced topology.
    }
}

/// Top nodes by points, masked for public display.
///
/// The sort is stable and the snapshot preserves registration order, so
/// ties rank the earlier connection first.
pub async fn leaderboard(state: &SharedState, limit: usize) -> Vec<LeaderboardEntry> {
    let mut snapshot = { state.read().await.registry.snapshot() };
    snapshot.sort_by(|a, b| b.points.cmp(&a.points));
    snapshot.truncate(limit);

    snapshot
        .iter()
        .enumerate()
        .map(|(i, s)| LeaderboardEntry {
            rank: i + 1,
            node_id: mask_node_id(&s.node_id),
            wallet: mask_wallet(s.wallet.as_deref()),
            points: s.points,
            phi: s.phi_contribution,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_16_hex_chars() {
        let id = derive_node_id("fp", Some("0xabc"), 1000.0);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn node_id_varies_with_time() {
        // Same client, different connect instants, different identities.
        let a = derive_node_id("fp", Some("0xabc"), 1000.0);
        let b = derive_node_id("fp", Some("0xabc"), 1000.5);
        assert_ne!(a, b);
    }

    #[test]
    fn node_id_is_deterministic_for_identical_inputs() {
        let a = derive_node_id("fp", None, 1000.0);
        let b = derive_node_id("fp", None, 1000.0);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_wallet_hashes_as_anonymous() {
        let with_literal = derive_node_id("fp", Some("anonymous"), 1000.0);
        let without = derive_node_id("fp", None, 1000.0);
        assert_eq!(with_literal, without);
    }
}
