//! Per-connection message loop.
//!
//! One task per WebSocket connection: a `select!` over the inbound frame
//! stream and the session's outbound channel. Inbound envelopes dispatch
//! to coordinator operations; malformed payloads get an ERROR reply and
//! the connection stays open. Whatever ends the loop — graceful
//! DISCONNECT, transport close, or an error — cleanup runs through the
//! coordinator's remove-if-present teardown, so racing a broadcast-failure
//! teardown is harmless.

use std::net::SocketAddr;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::coordinator::{self, SharedState, DEFAULT_LEADERBOARD_LIMIT};
use super::now_secs;
use super::wire::{ClientFrame, ServerFrame};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Default harmony for a CONNECT that doesn't report one.
const DEFAULT_HARMONY: f64 = 0.5;

/// Serialize a frame and send it as one WebSocket text message.
async fn send_json(sink: &mut WsSink, frame: &impl Serialize) -> HandlerResult {
    let text = serde_json::to_string(frame)?;
    sink.send(Message::text(text)).await?;
    Ok(())
}

/// Handle a single node connection from WebSocket accept to teardown.
pub async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    state: SharedState,
) -> HandlerResult {
    let ws = tokio_tungstenite::accept_async(socket).await?;
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut node_id: Option<String> = None;

    let result = message_loop(&mut sink, &mut source, &tx, &mut rx, &mut node_id, addr, &state).await;

    // Cleanup must run on every exit path, error or not.
    if let Some(id) = node_id {
        coordinator::disconnect_node(&state, &id).await;
    }
    result
}

async fn message_loop(
    sink: &mut WsSink,
    source: &mut WsSource,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    rx: &mut mpsc::UnboundedReceiver<ServerFrame>,
    node_id: &mut Option<String>,
    addr: SocketAddr,
    state: &SharedState,
) -> HandlerResult {
    loop {
        tokio::select! {
            // Next inbound frame from the client.
            frame = source.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(%addr, error = %e, "transport error");
                        return Ok(());
                    }
                    None => return Ok(()), // Connection closed.
                };
                match msg {
                    Message::Text(text) => {
                        if dispatch(sink, tx, node_id, addr, state, text.as_str()).await? {
                            return Ok(()); // Graceful DISCONNECT.
                        }
                    }
                    Message::Close(_) => return Ok(()),
                    // Ping/pong are answered by the transport; binary frames
                    // are not part of the protocol.
                    _ => {}
                }
            }

            // Outgoing frame from other tasks (broadcasts).
            Some(frame) = rx.recv() => {
                send_json(sink, &frame).await?;
            }
        }
    }
}

/// Dispatch one inbound envelope. Returns `true` when the loop should end
/// (graceful DISCONNECT, which sends no reply).
async fn dispatch(
    sink: &mut WsSink,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    node_id: &mut Option<String>,
    addr: SocketAddr,
    state: &SharedState,
    text: &str,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Connect {
            fingerprint,
            wallet,
            harmony,
        }) => {
            let fingerprint = fingerprint.unwrap_or_else(|| now_secs().to_string());
            let harmony = harmony.unwrap_or(DEFAULT_HARMONY);
            let id =
                coordinator::connect_node(state, fingerprint, wallet, harmony, addr, tx.clone())
                    .await;
            let network = coordinator::network_view(state).await;
            send_json(
                sink,
                &ServerFrame::Connected {
                    node_id: id.clone(),
                    network,
                },
            )
            .await?;
            *node_id = Some(id);
        }

        Ok(ClientFrame::Heartbeat { harmony }) => {
            // Heartbeats before CONNECT (or after this node's teardown)
            // are dropped, not errored.
            if let Some(id) = node_id.as_deref() {
                if let Some(reply) = coordinator::process_heartbeat(state, id, harmony).await {
                    send_json(sink, &reply).await?;
                }
            }
        }

        Ok(ClientFrame::GetLeaderboard) => {
            let leaderboard = coordinator::leaderboard(state, DEFAULT_LEADERBOARD_LIMIT).await;
            send_json(sink, &ServerFrame::Leaderboard { leaderboard }).await?;
        }

        Ok(ClientFrame::Disconnect) => {
            if let Some(id) = node_id.take() {
                coordinator::disconnect_node(state, &id).await;
            }
            return Ok(true);
        }

        Err(e) => {
            debug!(%addr, error = %e, "malformed frame");
            send_json(
                sink,
                &ServerFrame::Error {
                    message: "Invalid JSON".into(),
                },
            )
            .await?;
        }
    }
    Ok(false)
}
