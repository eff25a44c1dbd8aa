//! Test workspace client.
//!
//! A thin WebSocket client that speaks the `{t, payload}` envelope and
//! offers assertion-friendly receive helpers.

#![allow(dead_code)]

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
/// Window in which we assert that *no* message arrives.
const QUIET_WINDOW: Duration = Duration::from_millis(300);

/// A connected workspace client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to a workspace URL.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _response) = connect_async(url).await.context("websocket connect")?;
        Ok(Self { ws })
    }

    /// Connect and return the `INIT_STATE` payload along with the
    /// assigned client id.
    pub async fn join(url: &str) -> anyhow::Result<(Self, Value, String)> {
        let mut client = Self::connect(url).await?;
        let init = client.expect_message("INIT_STATE").await?;
        let client_id = init["clientId"]
            .as_str()
            .context("INIT_STATE.clientId missing")?
            .to_string();
        Ok((client, init, client_id))
    }

    /// Send one envelope.
    pub async fn send(&mut self, t: &str, payload: Value) -> anyhow::Result<()> {
        let frame = json!({ "t": t, "payload": payload }).to_string();
        self.ws.send(WsMessage::Text(frame)).await?;
        Ok(())
    }

    /// Send a raw text frame (for malformed-input tests).
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(WsMessage::Text(text.to_string())).await?;
        Ok(())
    }

    /// Receive the next envelope, skipping transport frames.
    pub async fn recv(&mut self) -> anyhow::Result<(String, Value)> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let frame = timeout(deadline - tokio::time::Instant::now(), self.ws.next())
                .await
                .context("timed out waiting for message")?
                .context("connection closed")??;
            match frame {
                WsMessage::Text(text) => {
                    let value: Value = serde_json::from_str(&text)?;
                    let t = value["t"]
                        .as_str()
                        .context("envelope missing t")?
                        .to_string();
                    return Ok((t, value["payload"].clone()));
                }
                WsMessage::Close(frame) => {
                    anyhow::bail!("connection closed: {frame:?}");
                }
                _ => continue,
            }
        }
    }

    /// Receive the next envelope and assert its type.
    pub async fn expect_message(&mut self, expected: &str) -> anyhow::Result<Value> {
        let (t, payload) = self.recv().await?;
        anyhow::ensure!(t == expected, "expected {expected}, got {t}: {payload}");
        Ok(payload)
    }

    /// Receive envelopes until one of the given type arrives, returning
    /// it and any messages that came first.
    pub async fn recv_until(&mut self, wanted: &str) -> anyhow::Result<(Value, Vec<(String, Value)>)> {
        let mut skipped = Vec::new();
        loop {
            let (t, payload) = self.recv().await?;
            if t == wanted {
                return Ok((payload, skipped));
            }
            skipped.push((t, payload));
        }
    }

    /// Assert that nothing arrives within the quiet window.
    pub async fn expect_silence(&mut self) -> anyhow::Result<()> {
        match timeout(QUIET_WINDOW, self.ws.next()).await {
            Err(_) => Ok(()),
            Ok(None) => anyhow::bail!("connection ended during quiet window"),
            Ok(Some(frame)) => {
                let frame = frame?;
                match frame {
                    WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(()),
                    other => anyhow::bail!("expected silence, got {other:?}"),
                }
            }
        }
    }

    /// Wait for the server to close the connection; returns the close code.
    pub async fn expect_close(&mut self) -> anyhow::Result<u16> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let frame = timeout(deadline - tokio::time::Instant::now(), self.ws.next())
                .await
                .context("timed out waiting for close")?;
            match frame {
                Some(Ok(WsMessage::Close(Some(frame)))) => return Ok(frame.code.into()),
                Some(Ok(WsMessage::Close(None))) => anyhow::bail!("close frame without code"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => anyhow::bail!("transport error before close: {e}"),
                None => anyhow::bail!("stream ended without close frame"),
            }
        }
    }

    /// Send a clean close frame.
    pub async fn close(&mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
