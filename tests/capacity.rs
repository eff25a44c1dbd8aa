//! Admission control: close-code contract and occupancy limits.

mod common;

use common::{TestClient, TestServer};
use futures_util::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[tokio::test]
async fn missing_room_closes_with_4004() -> anyhow::Result<()> {
    let server = TestServer::spawn(19010, 19011).await?;
    // No create_room call: the record does not exist.

    let mut client = TestClient::connect(&server.ws_url("NeverMade", Some("Alice"))).await?;
    assert_eq!(
        client.expect_close().await?,
        blockshare_proto::close::ROOM_NOT_FOUND
    );
    Ok(())
}

#[tokio::test]
async fn full_room_closes_with_4003() -> anyhow::Result<()> {
    let server = TestServer::spawn(19020, 19021).await?;
    server.create_room("R1").await?;

    // max_users is 2 in the test config.
    let (mut alice, _, _) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    let (_bob, _, _) = TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;
    alice.expect_message("USER_JOINED").await?;

    let mut carol = TestClient::connect(&server.ws_url("R1", Some("Carol"))).await?;
    assert_eq!(
        carol.expect_close().await?,
        blockshare_proto::close::ROOM_FULL
    );

    // The rejection left no trace: occupancy stays 2 and nobody heard a
    // join or leave for Carol.
    let body = server.http_get("/room/R1/").await?;
    assert!(body.contains("\"current_users\":2"), "body: {body}");
    alice.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn slot_freed_by_departure_is_reusable() -> anyhow::Result<()> {
    let server = TestServer::spawn(19030, 19031).await?;
    server.create_room("R1").await?;

    let (mut alice, _, _) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    let (mut bob, _, _) = TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;
    alice.expect_message("USER_JOINED").await?;

    bob.close().await?;
    alice.expect_message("USER_LEFT").await?;

    // Carol now fits.
    let (_carol, init, _) = TestClient::join(&server.ws_url("R1", Some("Carol"))).await?;
    let users = init["users"].as_array().expect("users array");
    assert_eq!(users.len(), 1, "only Alice should remain");
    Ok(())
}

#[tokio::test]
async fn unknown_path_is_refused_at_upgrade() -> anyhow::Result<()> {
    let _server = TestServer::spawn(19040, 19041).await?;

    let url = format!("ws://127.0.0.1:{}/ws/other/R1/", 19040);
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_err(), "upgrade on a foreign path must fail");
    Ok(())
}

#[tokio::test]
async fn rejected_connection_receives_no_room_traffic() -> anyhow::Result<()> {
    let server = TestServer::spawn(19050, 19051).await?;
    server.create_room("R1").await?;

    let (_alice, _, _) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    let (_bob, _, _) = TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;

    // Carol is rejected; until the close frame arrives she must see no
    // envelopes at all.
    let (mut ws, _) =
        tokio_tungstenite::connect_async(&server.ws_url("R1", Some("Carol"))).await?;
    while let Some(frame) = ws.next().await {
        match frame? {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4003);
                break;
            }
            WsMessage::Text(text) => {
                anyhow::bail!("rejected client received traffic: {text}");
            }
            _ => continue,
        }
    }
    Ok(())
}

#[tokio::test]
async fn room_ids_isolate_traffic() -> anyhow::Result<()> {
    let server = TestServer::spawn(19060, 19061).await?;
    server.create_room("A").await?;
    server.create_room("B").await?;

    let (mut alice, _, _) = TestClient::join(&server.ws_url("A", Some("Alice"))).await?;
    let (mut bob, _, bob_id) = TestClient::join(&server.ws_url("B", Some("Bob"))).await?;

    bob.send("LOCK_ACQUIRE", json!({"blockId": "b1"})).await?;
    let update = bob.expect_message("LOCK_UPDATE").await?;
    assert_eq!(update["owner"], json!(bob_id));

    // Alice, in room A, hears nothing about room B.
    alice.expect_silence().await?;
    Ok(())
}
