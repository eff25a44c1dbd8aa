//! Phase 3: the unified per-session event loop.
//!
//! One `tokio::select!` over three sources: inbound WebSocket frames, the
//! room bus subscription, and the server shutdown signal. The loop is the
//! connection's only writer, and one inbound message is fully handled
//! (every store operation and bus publish issued) before the next frame
//! is read.

use super::dispatch;
use super::{handshake, Session, WsSink, WsStream};
use crate::bus::Event;
use blockshare_proto::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExitReason {
    /// The client closed the connection or the stream ended.
    ClientClosed,
    /// Reading or writing the socket failed.
    TransportError,
    /// The bus dropped this session's sink (queue overflow).
    SlowSink,
    /// Server shutdown was signalled.
    Shutdown,
}

/// Run Phase 3: the unified event loop (post-activation).
pub(super) async fn run(
    session: &Session,
    ws_tx: &mut WsSink,
    mut ws_rx: WsStream,
    mut bus_rx: mpsc::Receiver<Arc<Event>>,
) -> ExitReason {
    let mut shutdown_rx = session.hub.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = handle_frame(session, &text, ws_tx).await {
                            warn!(error = %e, "Write error");
                            return ExitReason::TransportError;
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if ws_tx.send(WsMessage::Pong(payload)).await.is_err() {
                            return ExitReason::TransportError;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("Client sent close frame");
                        return ExitReason::ClientClosed;
                    }
                    Some(Ok(_)) => {
                        // Binary, pong, raw frames: nothing to do.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "Read error");
                        return ExitReason::TransportError;
                    }
                    None => {
                        debug!("Client stream ended");
                        return ExitReason::ClientClosed;
                    }
                }
            }

            event = bus_rx.recv() => {
                match event {
                    Some(event) => {
                        if forward_event(session, &event, ws_tx).await.is_err() {
                            return ExitReason::TransportError;
                        }
                    }
                    None => {
                        warn!("Bus subscription dropped - disconnecting slow session");
                        return ExitReason::SlowSink;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received");
                return ExitReason::Shutdown;
            }
        }
    }
}

/// Decode and dispatch one inbound text frame. Malformed frames and
/// unknown types are dropped silently; only transport failures surface.
async fn handle_frame(
    session: &Session,
    text: &str,
    ws_tx: &mut WsSink,
) -> crate::error::SessionResult<()> {
    let Some(msg) = ClientMessage::decode(text) else {
        trace!(len = text.len(), "Dropping malformed frame");
        crate::metrics::MESSAGES_DROPPED.inc();
        return Ok(());
    };
    crate::metrics::MESSAGES_RECEIVED.inc();

    match msg {
        ClientMessage::LockAcquire(payload) => {
            dispatch::handle_acquire(session, payload, ws_tx).await
        }
        ClientMessage::Commit(payload) => {
            dispatch::handle_commit(session, payload).await;
            Ok(())
        }
        ClientMessage::Heartbeat {} => {
            dispatch::handle_heartbeat(session).await;
            Ok(())
        }
    }
}

/// Deliver a bus event to this connection, filtering self-origin
/// membership announcements.
async fn forward_event(
    session: &Session,
    event: &Event,
    ws_tx: &mut WsSink,
) -> crate::error::SessionResult<()> {
    let msg = match event {
        Event::UserJoined {
            client_id,
            nickname,
            color,
        } => {
            if *client_id == session.client_id {
                return Ok(());
            }
            ServerMessage::UserJoined {
                client_id: client_id.clone(),
                nickname: nickname.clone(),
                color: color.clone(),
            }
        }
        Event::UserLeft { client_id } => {
            if *client_id == session.client_id {
                return Ok(());
            }
            ServerMessage::UserLeft {
                client_id: client_id.clone(),
            }
        }
        Event::LockUpdate { block_id, owner } => ServerMessage::LockUpdate {
            block_id: block_id.clone(),
            owner: owner.clone(),
        },
        Event::CommitApply {
            block_id,
            events,
            by,
            workspace_xml,
        } => ServerMessage::CommitApply {
            block_id: block_id.clone(),
            events: events.clone(),
            by: by.clone(),
            workspace_xml: workspace_xml.clone(),
        },
    };
    handshake::send_message(ws_tx, &msg).await
}
