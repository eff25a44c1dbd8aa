//! Disconnect cleanup: every held lock released, presence retired, and
//! the departure announced - on clean closes and abrupt drops alike.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;

#[tokio::test]
async fn abrupt_disconnect_releases_all_locks_then_announces() -> anyhow::Result<()> {
    let server = TestServer::spawn(19110, 19111).await?;
    server.create_room("R1").await?;

    let (mut alice, _, alice_id) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    let (mut bob, _, _) = TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;
    alice.expect_message("USER_JOINED").await?;

    for block in ["b1", "b2"] {
        alice.send("LOCK_ACQUIRE", json!({"blockId": block})).await?;
        alice.expect_message("LOCK_UPDATE").await?;
        bob.expect_message("LOCK_UPDATE").await?;
    }

    // Alice's transport drops without a close frame.
    drop(alice);

    // Bob sees both locks release (in either order), then the departure.
    let mut released = Vec::new();
    let (left, skipped) = bob.recv_until("USER_LEFT").await?;
    for (t, payload) in skipped {
        anyhow::ensure!(t == "LOCK_UPDATE", "unexpected {t}: {payload}");
        anyhow::ensure!(payload["owner"].is_null(), "release must null the owner");
        released.push(payload["blockId"].as_str().expect("blockId").to_string());
    }
    released.sort();
    assert_eq!(released, vec!["b1", "b2"]);
    assert_eq!(left["clientId"], json!(alice_id));

    // No trace remains: the blocks are free and the slot is open.
    bob.send("LOCK_ACQUIRE", json!({"blockId": "b1"})).await?;
    bob.expect_message("LOCK_UPDATE").await?;

    let (_carol, init, _) = TestClient::join(&server.ws_url("R1", Some("Carol"))).await?;
    let users = init["users"].as_array().expect("users array");
    assert_eq!(users.len(), 1, "only Bob remains online");
    Ok(())
}

#[tokio::test]
async fn clean_close_announces_departure_without_lock_noise() -> anyhow::Result<()> {
    let server = TestServer::spawn(19120, 19121).await?;
    server.create_room("R1").await?;

    let (mut alice, _, _) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    let (mut bob, _, bob_id) = TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;
    alice.expect_message("USER_JOINED").await?;

    // Bob holds nothing; his exit is a single USER_LEFT.
    bob.close().await?;
    let left = alice.expect_message("USER_LEFT").await?;
    assert_eq!(left["clientId"], json!(bob_id));
    alice.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn released_lock_is_gone_from_later_snapshots() -> anyhow::Result<()> {
    let server = TestServer::spawn(19130, 19131).await?;
    server.create_room("R1").await?;

    let (mut alice, _, _) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    alice.send("LOCK_ACQUIRE", json!({"blockId": "b9"})).await?;
    alice.expect_message("LOCK_UPDATE").await?;
    drop(alice);

    // Give cleanup a moment, then a fresh joiner must see no locks.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let (_bob, init, _) = TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;
    assert_eq!(init["locks"], json!({}));
    assert_eq!(init["users"], json!([]));
    Ok(())
}
