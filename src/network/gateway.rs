//! Gateway - TCP listener that accepts incoming workspace connections.
//!
//! The Gateway binds a socket, performs the WebSocket upgrade, and spawns
//! a Session task per connection. Route validation happens inside the
//! upgrade callback: a request whose path does not match
//! `/ws/workspace/{room_id}/` is refused at the HTTP layer (404) before
//! the socket is ever accepted, so sessions always start with a parsed
//! room id in hand.

use crate::network::session::Session;
use crate::state::Hub;
use blockshare_proto::ConnectRoute;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, instrument};

/// The Gateway accepts incoming TCP connections and spawns session handlers.
pub struct Gateway {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(addr: SocketAddr, hub: Arc<Hub>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Gateway listening");
        Ok(Self { listener, hub })
    }

    /// Run the gateway, accepting connections until shutdown.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> std::io::Result<()> {
        let mut shutdown_rx = self.hub.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Connection accepted");
                        let hub = Arc::clone(&self.hub);
                        tokio::spawn(async move {
                            handle_socket(stream, addr, hub).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received - gateway stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Upgrade one socket and run its session to completion.
async fn handle_socket(stream: TcpStream, addr: SocketAddr, hub: Arc<Hub>) {
    let mut route: Option<ConnectRoute> = None;

    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match ConnectRoute::parse(&req.uri().to_string()) {
            Ok(parsed) => {
                route = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                debug!(%addr, error = %e, "Rejecting upgrade for unknown route");
                let mut resp = ErrorResponse::new(Some("not found".to_string()));
                *resp.status_mut() = StatusCode::NOT_FOUND;
                Err(resp)
            }
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, error = %e, "WebSocket upgrade failed");
            return;
        }
    };

    // The callback ran exactly once on success, so the route is present.
    let Some(route) = route else {
        error!(%addr, "Upgrade succeeded without a captured route");
        return;
    };

    let session = Session::new(hub, addr, route);
    if let Err(e) = session.run(ws).await {
        debug!(%addr, error = %e, "Session ended with error");
    }
}
