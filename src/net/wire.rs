//! Node wire protocol — JSON over WebSocket.
//!
//! Each WebSocket text frame is one tagged JSON envelope. Inbound frames
//! deserialize into [`ClientFrame`]; outbound frames are built from the
//! view structs here and serialized per send. The aggregate fields ride
//! along on every push (`#[serde(flatten)]`), so clients can read
//! `collective_phi` off any frame they receive.

use serde::{Deserialize, Serialize};

/// Inbound protocol message, the sole client-to-server envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Register a new node on this connection.
    #[serde(rename = "CONNECT")]
    Connect {
        #[serde(default)]
        fingerprint: Option<String>,
        #[serde(default)]
        wallet: Option<String>,
        #[serde(default)]
        harmony: Option<f64>,
    },

    /// Periodic liveness + credit tick. Harmony is optional; when absent
    /// the last reported value stands.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        #[serde(default)]
        harmony: Option<f64>,
    },

    /// Request the ranked points table.
    #[serde(rename = "GET_LEADERBOARD")]
    GetLeaderboard,

    /// Graceful teardown. No reply; the connection loop ends.
    #[serde(rename = "DISCONNECT")]
    Disconnect,
}

/// Aggregate network view — the fields of every NETWORK_STATE push.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStateView {
    pub node_count: usize,
    pub collective_phi: f64,
    pub peak_nodes: usize,
    pub total_points_distributed: u64,
    /// Seconds since process start.
    pub uptime: f64,
    /// RFC 3339 wall-clock time of the view.
    pub timestamp: String,
}

/// A node's own view: the per-node half of a heartbeat reply.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStateView {
    pub node_id: String,
    pub points: u64,
    pub phi_contribution: f64,
    pub harmony: f64,
    /// Seconds since this node connected.
    pub connected_duration: f64,
    pub rank: usize,
}

/// Heartbeat reply: the node's own view and the aggregate view flattened
/// into one frame. The aggregate half supplies the discriminant, so every
/// push a client receives carries the same `NETWORK_STATE` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "NETWORK_STATE")]
pub struct NodeStateFrame {
    #[serde(flatten)]
    pub node: NodeStateView,
    #[serde(flatten)]
    pub network: NetworkStateView,
}

/// One row of the LEADERBOARD reply. Identity and wallet are masked.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub node_id: String,
    pub wallet: String,
    pub points: u64,
    pub phi: f64,
}

/// Outbound protocol message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Registration acknowledgement, sent once per CONNECT.
    #[serde(rename = "CONNECTED")]
    Connected {
        node_id: String,
        #[serde(flatten)]
        network: NetworkStateView,
    },

    /// Aggregate state — broadcast on the fixed cadence and after every
    /// topology change.
    #[serde(rename = "NETWORK_STATE")]
    NetworkState {
        #[serde(flatten)]
        network: NetworkStateView,
    },

    /// Ranked points table.
    #[serde(rename = "LEADERBOARD")]
    Leaderboard { leaderboard: Vec<LeaderboardEntry> },

    /// Malformed input. The connection stays open.
    #[serde(rename = "ERROR")]
    Error { message: String },
}

/// Mask a node id for public display: first 8 chars + ellipsis.
pub fn mask_node_id(node_id: &str) -> String {
    let head: String = node_id.chars().take(8).collect();
    format!("{head}...")
}

/// Mask a wallet for public display: first 6 + "..." + last 4 chars, or
/// `"anonymous"` when absent.
pub fn mask_wallet(wallet: Option<&str>) -> String {
    match wallet {
        Some(w) => {
            let head: String = w.chars().take(6).collect();
            let chars: Vec<char> = w.chars().collect();
            let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
            format!("{head}...{tail}")
        }
        None => "anonymous".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_view() -> NetworkStateView {
        NetworkStateView {
            node_count: 2,
            collective_phi: 0.168,
            peak_nodes: 3,
            total_points_distributed: 42,
            uptime: 12.5,
            timestamp: "2026-02-05T00:00:00+00:00".into(),
        }
    }

    // ── inbound parsing ──────────────────────────────────────────

    #[test]
    fn parse_connect_with_all_fields() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"CONNECT","fingerprint":"f1","wallet":"0xabc","harmony":0.7}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Connect {
                fingerprint,
                wallet,
                harmony,
            } => {
                assert_eq!(fingerprint.as_deref(), Some("f1"));
                assert_eq!(wallet.as_deref(), Some("0xabc"));
                assert_eq!(harmony, Some(0.7));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn parse_connect_defaults_optionals() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"CONNECT"}"#).unwrap();
        match frame {
            ClientFrame::Connect {
                fingerprint,
                wallet,
                harmony,
            } => {
                assert!(fingerprint.is_none());
                assert!(wallet.is_none());
                assert!(harmony.is_none());
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn parse_heartbeat_without_harmony() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"HEARTBEAT"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Heartbeat { harmony: None }));
    }

    #[test]
    fn parse_disconnect() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"DISCONNECT"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Disconnect));
    }

    #[test]
    fn unknown_discriminant_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"TELEPORT"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
    }

    // ── outbound shape ───────────────────────────────────────────

    #[test]
    fn network_state_flattens_aggregate_fields() {
        let json = serde_json::to_value(ServerFrame::NetworkState {
            network: network_view(),
        })
        .unwrap();
        assert_eq!(json["type"], "NETWORK_STATE");
        assert_eq!(json["node_count"], 2);
        assert_eq!(json["collective_phi"], 0.168);
        assert_eq!(json["peak_nodes"], 3);
        assert_eq!(json["total_points_distributed"], 42);
    }

    #[test]
    fn connected_carries_node_id_and_aggregate() {
        let json = serde_json::to_value(ServerFrame::Connected {
            node_id: "abcdef0123456789".into(),
            network: network_view(),
        })
        .unwrap();
        assert_eq!(json["type"], "CONNECTED");
        assert_eq!(json["node_id"], "abcdef0123456789");
        assert_eq!(json["node_count"], 2);
    }

    #[test]
    fn heartbeat_reply_merges_node_and_network_under_network_tag() {
        let json = serde_json::to_value(NodeStateFrame {
            node: NodeStateView {
                node_id: "abcdef0123456789".into(),
                points: 7,
                phi_contribution: 0.07,
                harmony: 0.7,
                connected_duration: 3.0,
                rank: 1,
            },
            network: network_view(),
        })
        .unwrap();
        assert_eq!(json["type"], "NETWORK_STATE");
        assert_eq!(json["points"], 7);
        assert_eq!(json["rank"], 1);
        assert_eq!(json["collective_phi"], 0.168);
    }

    // ── masking ──────────────────────────────────────────────────

    #[test]
    fn node_id_masked_to_eight_chars() {
        assert_eq!(mask_node_id("abcdef0123456789"), "abcdef01...");
    }

    #[test]
    fn wallet_masked_head_and_tail() {
        assert_eq!(
            mask_wallet(Some("0x1234567890abcdef")),
            "0x1234...cdef"
        );
        assert_eq!(mask_wallet(None), "anonymous");
    }
}
