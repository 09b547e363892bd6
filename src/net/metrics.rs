//! Metric names for the node network.
//!
//! All metric name constants live here. Call sites use these constants
//! rather than raw strings to prevent typos and keep renaming centralized.
//! Without a recorder installed the macros are no-ops.

/// Currently connected nodes (gauge).
pub const NODES_ACTIVE: &str = "chorus_nodes_active";
/// Peak concurrent nodes this process lifetime (gauge).
pub const NODES_PEAK: &str = "chorus_nodes_peak";
/// Total credit distributed across all nodes (counter).
pub const POINTS_DISTRIBUTED: &str = "chorus_points_distributed_total";
/// Heartbeats processed (counter).
pub const HEARTBEATS: &str = "chorus_heartbeats_total";
/// Aggregate-state broadcast passes completed (counter).
pub const BROADCASTS: &str = "chorus_broadcasts_total";
/// Stats snapshot rows persisted (counter).
pub const STATS_SNAPSHOTS: &str = "chorus_stats_snapshots_total";
