//! Session - the per-connection coordinator.
//!
//! Each accepted WebSocket runs one Session task through this lifecycle:
//!
//! ```text
//! Phase 1: Admission (room exists? capacity?)  → Rejected (4003/4004)
//!    ↓
//! Phase 2: Activation (presence, INIT_STATE, USER_JOINED)
//!    ↓
//! Phase 3: Event loop (tokio::select!)
//!    ┌──────────────────────────────────────────────────┐
//!    │                  Session Task                    │
//!    │                                                  │
//!    │   ws reader ──► dispatch ──► store / bus publish │
//!    │   bus sink  ──► filter-self ──► ws writer        │
//!    └──────────────────────────────────────────────────┘
//!    ↓
//! Phase 4: Cleanup (always runs: locks, presence, USER_LEFT)
//! ```
//!
//! The select! loop is the only writer on the socket, so outbound sends
//! are serialized per connection by construction. Cleanup is reached on
//! every exit from the active phase - client close, transport error, slow
//! sink eviction, and server shutdown all fall through to it.

mod dispatch;
mod event_loop;
mod handshake;

use crate::error::{SessionError, SessionResult};
use crate::state::{Hub, SessionPhase};
use blockshare_proto::ConnectRoute;
use event_loop::ExitReason;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, instrument, trace, warn};

pub(super) type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
pub(super) type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Store key of a room's document snapshot.
fn snapshot_key(room_id: &str) -> String {
    format!("blocks:{room_id}")
}

/// A workspace session handler.
pub struct Session {
    hub: Arc<Hub>,
    addr: SocketAddr,
    room_id: String,
    client_id: String,
    nickname: String,
    color: String,
    phase: SessionPhase,
}

impl Session {
    /// Create a session for an upgraded connection.
    ///
    /// Identity is fixed here: a fresh v4 UUID for `client_id`, the
    /// route's nickname (or a synthesized fallback), and a random palette
    /// color.
    pub fn new(hub: Arc<Hub>, addr: SocketAddr, route: ConnectRoute) -> Self {
        Self {
            hub,
            addr,
            room_id: route.room_id,
            client_id: uuid::Uuid::new_v4().to_string(),
            nickname: route
                .nickname
                .unwrap_or_else(handshake::fallback_nickname),
            color: handshake::random_color().to_string(),
            phase: SessionPhase::Connecting,
        }
    }

    fn transition(&mut self, next: SessionPhase) {
        debug_assert!(
            self.phase.can_transition(next),
            "invalid session transition {:?} -> {:?}",
            self.phase,
            next
        );
        trace!(from = ?self.phase, to = ?next, "Session phase change");
        self.phase = next;
    }

    /// Run the session lifecycle to completion.
    #[instrument(
        skip(self, ws),
        fields(room = %self.room_id, client = %self.client_id, addr = %self.addr),
        name = "session"
    )]
    pub async fn run(mut self, mut ws: WebSocketStream<TcpStream>) -> SessionResult<()> {
        info!(nickname = %self.nickname, "Client connecting");

        // Phase 1: Admission. No state is mutated before this passes.
        let room = match handshake::admit(&self).await {
            Ok(room) => room,
            Err(e) => return self.reject(&mut ws, e).await,
        };
        self.transition(SessionPhase::Active);
        crate::metrics::CONNECTIONS_TOTAL.inc();
        crate::metrics::ACTIVE_SESSIONS.inc();
        debug!(max_users = room.max_users, "Admitted to room");

        // Subscribed before any of our own state lands in the store, so we
        // observe every event concerning us from here on.
        let (sink_id, bus_rx) = self.hub.bus.subscribe(&self.room_id);
        let (mut ws_tx, ws_rx) = futures_util::StreamExt::split(ws);

        // Phase 2 + 3: activation, then the event loop. Failures fall
        // through to cleanup - past this point the session may own locks
        // and a presence entry.
        match handshake::activate(&self, &mut ws_tx).await {
            Ok(()) => {
                let reason = event_loop::run(&self, &mut ws_tx, ws_rx, bus_rx).await;
                info!(reason = ?reason, "Session leaving event loop");
                if matches!(reason, ExitReason::Shutdown) {
                    let frame = CloseFrame {
                        code: CloseCode::Restart,
                        reason: "server shutting down".into(),
                    };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                }
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Activation failed");
            }
        }

        // Phase 4: Cleanup. Runs on every exit from Active.
        self.transition(SessionPhase::Closing);
        self.cleanup().await;
        self.hub.bus.unsubscribe(&self.room_id, sink_id);
        self.transition(SessionPhase::Closed);
        crate::metrics::ACTIVE_SESSIONS.dec();

        let _ = ws_tx.close().await;
        info!("Client disconnected");
        Ok(())
    }

    /// Close an unadmitted connection with its contract close code.
    async fn reject(
        &mut self,
        ws: &mut WebSocketStream<TcpStream>,
        error: SessionError,
    ) -> SessionResult<()> {
        self.transition(SessionPhase::Rejected);
        match error.close_code() {
            Some(code) => {
                info!(code, reason = error.error_code(), "Rejecting connection");
                if code == blockshare_proto::close::ROOM_FULL {
                    crate::metrics::REJECTED_ROOM_FULL.inc();
                } else {
                    crate::metrics::REJECTED_ROOM_NOT_FOUND.inc();
                }
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: error.to_string().into(),
                };
                let _ = ws.close(Some(frame)).await;
                Ok(())
            }
            None => {
                // Collaborator failure during admission; nothing to clean.
                warn!(error = %error, code = error.error_code(), "Admission failed");
                let _ = ws.close(None).await;
                Err(error)
            }
        }
    }

    /// Disconnect-time cleanup: release every held lock, retire presence,
    /// announce the departure. Best-effort throughout - a store failure
    /// here is logged and the TTLs bound any leftovers.
    async fn cleanup(&self) {
        match self
            .hub
            .locks
            .release_all(&self.room_id, &self.client_id)
            .await
        {
            Ok(released) => {
                for block_id in released {
                    self.hub.bus.publish(
                        &self.room_id,
                        crate::bus::Event::LockUpdate {
                            block_id,
                            owner: None,
                        },
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to release locks on disconnect");
            }
        }

        if let Err(e) = self
            .hub
            .presence
            .remove(&self.room_id, &self.client_id)
            .await
        {
            warn!(error = %e, "Failed to remove presence on disconnect");
        }

        self.hub.bus.publish(
            &self.room_id,
            crate::bus::Event::UserLeft {
                client_id: self.client_id.clone(),
            },
        );
    }
}
