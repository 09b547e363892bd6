//! The node network core.
//!
//! Connected clients ("nodes") report a harmony metric over a persistent
//! WebSocket connection; the server accrues participation credit per
//! heartbeat, folds everyone's contribution into a collective Φ value, and
//! broadcasts the aggregate state back on a fixed cadence. Lifetime and
//! per-session records go to SQLite.

pub mod coordinator;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod scoring;
pub mod server;
pub mod store;
pub mod wire;

/// Unix time in seconds, as a float.
pub(crate) fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
