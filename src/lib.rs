//! Chorus — a real-time presence-and-scoring server.
//!
//! Nodes connect over WebSocket, report harmony, earn points, and receive
//! the network's collective state back every second. See [`net`] for the
//! core.

pub mod net;
