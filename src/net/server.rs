//! Server bootstrap — listener, accept loop, and the periodic tickers.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::coordinator::{self, NetworkState, SharedState};
use super::handler;
use super::metrics::STATS_SNAPSHOTS;
use super::now_secs;
use super::scoring;
use super::store::NetworkStore;

/// Fixed cadence for NETWORK_STATE broadcasts, regardless of activity.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);
/// Fixed cadence for durable network stats snapshots.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

type ServeResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Run the node network server until the accept loop exits (it shouldn't).
pub async fn run(bind_addr: &str, db_path: &Path) -> ServeResult {
    let store = NetworkStore::open(db_path)?;
    let (_state, _local_addr, accept_handle) = start(bind_addr, store).await?;
    accept_handle.await??;
    Ok(())
}

/// Bind the listener and spawn the accept loop plus both background
/// tickers. Returns the shared state and the bound address so tests can
/// drive a server on an ephemeral port.
pub async fn start(
    bind_addr: &str,
    store: NetworkStore,
) -> Result<(SharedState, SocketAddr, JoinHandle<ServeResult>), Box<dyn std::error::Error + Send + Sync>>
{
    let state = NetworkState::shared(store);

    let listener = TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "listening for node connections");

    spawn_broadcast_ticker(Arc::clone(&state));
    spawn_stats_ticker(Arc::clone(&state));

    let accept_state = Arc::clone(&state);
    let handle = tokio::spawn(accept_loop(listener, accept_state));

    Ok((state, local_addr, handle))
}

/// Accept loop — one task per inbound connection.
async fn accept_loop(listener: TcpListener, state: SharedState) -> ServeResult {
    loop {
        let (socket, addr) = listener.accept().await?;
        info!(%addr, "new connection");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handler::handle_connection(socket, addr, state).await {
                warn!(%addr, "connection error: {e}");
            }
            info!(%addr, "connection closed");
        });
    }
}

fn spawn_broadcast_ticker(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(BROADCAST_INTERVAL).await;
            coordinator::broadcast_state(&state).await;
        }
    })
}

fn spawn_stats_ticker(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(STATS_INTERVAL).await;
            persist_stats(&state).await;
        }
    })
}

/// Persist one network-wide stats row: fields snapshot under the read
/// lock, aggregate math and the write outside it.
pub async fn persist_stats(state: &SharedState) {
    let (snapshot, total, store) = {
        let st = state.read().await;
        (
            st.registry.snapshot(),
            st.total_points_distributed,
            st.store(),
        )
    };
    let phi = scoring::collective_phi(&snapshot);
    if let Err(e) = store.append_stats(now_secs(), snapshot.len(), phi, total) {
        warn!(error = %e, "failed to persist network stats");
    } else {
        counter!(STATS_SNAPSHOTS).increment(1);
    }
}
