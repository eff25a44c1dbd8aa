//! Test server management.
//!
//! Spawns and manages blockshared instances for integration testing. Each
//! server runs the in-process memory store backend, so tests need no
//! external Redis.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

/// A test server instance.
pub struct TestServer {
    child: Child,
    ws_port: u16,
    http_port: u16,
    // Holds the config and database files for the server's lifetime.
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Spawn a new test server on the given port pair.
    ///
    /// Rooms are created with `max_users = 2` so capacity tests need only
    /// three clients.
    pub async fn spawn(ws_port: u16, http_port: u16) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;

        let config_path = data_dir.path().join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "test.blockshare"

[listen]
address = "127.0.0.1:{ws_port}"

[http]
address = "127.0.0.1:{http_port}"

[store]
backend = "memory"

[database]
path = "{db_path}"

[rooms]
default_max_users = 2
"#,
            db_path = data_dir.path().join("rooms.db").display(),
        );
        std::fs::write(&config_path, config_content)?;

        // Build path to blockshared binary (in workspace target dir)
        let cargo_manifest_dir = env!("CARGO_MANIFEST_DIR");
        let binary_path = PathBuf::from(cargo_manifest_dir).join("target/debug/blockshared");

        let child = Command::new(&binary_path)
            .arg(config_path.to_str().expect("utf-8 config path"))
            .spawn()?;

        let server = Self {
            child,
            ws_port,
            http_port,
            _data_dir: data_dir,
        };

        server.wait_until_ready().await?;
        Ok(server)
    }

    /// The WebSocket URL for joining a room.
    pub fn ws_url(&self, room_id: &str, nickname: Option<&str>) -> String {
        match nickname {
            Some(nick) => format!(
                "ws://127.0.0.1:{}/ws/workspace/{}/?nickname={}",
                self.ws_port, room_id, nick
            ),
            None => format!("ws://127.0.0.1:{}/ws/workspace/{}/", self.ws_port, room_id),
        }
    }

    /// Provision a room via the HTTP collaborator and return the raw
    /// response body.
    pub async fn create_room(&self, room_id: &str) -> anyhow::Result<String> {
        let body = self.http_get(&format!("/room/{room_id}/")).await?;
        anyhow::ensure!(
            body.contains(&format!("\"room_id\":\"{room_id}\"")),
            "unexpected room response: {body}"
        );
        Ok(body)
    }

    /// Issue a plain HTTP/1.1 GET and return the response body.
    pub async fn http_get(&self, path: &str) -> anyhow::Result<String> {
        let mut stream = TcpStream::connect(("127.0.0.1", self.http_port)).await?;
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        let response = String::from_utf8(response)?;

        let (head, body) = response
            .split_once("\r\n\r\n")
            .ok_or_else(|| anyhow::anyhow!("malformed HTTP response"))?;
        anyhow::ensure!(
            head.starts_with("HTTP/1.1 200"),
            "unexpected HTTP status: {}",
            head.lines().next().unwrap_or_default()
        );
        Ok(body.to_string())
    }

    /// Wait for both listeners to come up.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            let http = TcpStream::connect(("127.0.0.1", self.http_port)).await;
            let ws = TcpStream::connect(("127.0.0.1", self.ws_port)).await;
            if http.is_ok() && ws.is_ok() {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not become ready on ports {}/{}", self.ws_port, self.http_port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
