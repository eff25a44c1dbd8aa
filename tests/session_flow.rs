//! Session lifecycle: admission, INIT_STATE, and join fan-out.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;

#[tokio::test]
async fn lone_join_gets_empty_room_snapshot() -> anyhow::Result<()> {
    let server = TestServer::spawn(18810, 18811).await?;
    server.create_room("R1").await?;

    let (mut alice, init, client_id) =
        TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;

    assert!(!client_id.is_empty());
    assert_eq!(init["users"], json!([]));
    assert_eq!(init["locks"], json!({}));
    assert!(init.get("workspaceXml").is_none());

    // No other broadcast follows a lone join.
    alice.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn join_fans_out_to_peers_but_not_self() -> anyhow::Result<()> {
    let server = TestServer::spawn(18820, 18821).await?;
    server.create_room("R1").await?;

    let (mut alice, _, alice_id) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    let (mut bob, bob_init, bob_id) =
        TestClient::join(&server.ws_url("R1", Some("Bob"))).await?;

    // Bob's snapshot lists Alice and only Alice.
    let users = bob_init["users"].as_array().expect("users array");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["clientId"], json!(alice_id));
    assert_eq!(users[0]["nickname"], json!("Alice"));
    assert!(users[0]["color"].as_str().expect("color").starts_with('#'));

    // Alice learns about Bob.
    let joined = alice.expect_message("USER_JOINED").await?;
    assert_eq!(joined["clientId"], json!(bob_id));
    assert_eq!(joined["nickname"], json!("Bob"));

    // Bob never sees his own join.
    bob.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn nickname_is_url_decoded_and_fallback_synthesized() -> anyhow::Result<()> {
    let server = TestServer::spawn(18830, 18831).await?;
    server.create_room("R1").await?;

    let (mut alice, _, _) =
        TestClient::join(&server.ws_url("R1", Some("Caf%C3%A9%20Bob"))).await?;

    // The second client omits the nickname parameter entirely.
    let (_anon, anon_init, _) = TestClient::join(&server.ws_url("R1", None)).await?;

    // The peer list carries the URL-decoded name.
    let users = anon_init["users"].as_array().expect("users array");
    assert_eq!(users[0]["nickname"], json!("Café Bob"));

    // And the fallback is User{1000..9999}.
    let joined = alice.expect_message("USER_JOINED").await?;
    let nick = joined["nickname"].as_str().expect("nickname");
    let digits: u32 = nick
        .strip_prefix("User")
        .expect("User prefix")
        .parse()
        .expect("numeric suffix");
    assert!((1000..10_000).contains(&digits));
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_ignored() -> anyhow::Result<()> {
    let server = TestServer::spawn(18840, 18841).await?;
    server.create_room("R1").await?;

    let (mut alice, _, alice_id) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;

    alice.send_raw("not json at all").await?;
    alice.send_raw(r#"{"t":"NO_SUCH_TYPE","payload":{}}"#).await?;
    alice.send_raw(r#"{"t":"LOCK_ACQUIRE"}"#).await?;
    alice.send_raw(r#"{"payload":{"blockId":"b1"}}"#).await?;

    // The session is still live and processing messages.
    alice.send("LOCK_ACQUIRE", json!({"blockId": "b1"})).await?;
    let update = alice.expect_message("LOCK_UPDATE").await?;
    assert_eq!(update["blockId"], json!("b1"));
    assert_eq!(update["owner"], json!(alice_id));
    Ok(())
}

#[tokio::test]
async fn heartbeat_refreshes_presence_silently() -> anyhow::Result<()> {
    let server = TestServer::spawn(18850, 18851).await?;
    server.create_room("R1").await?;

    let (mut alice, _, _) = TestClient::join(&server.ws_url("R1", Some("Alice"))).await?;
    alice.send("HEARTBEAT", json!({})).await?;
    alice.expect_silence().await?;

    let body = server.http_get("/room/R1/").await?;
    assert!(body.contains("\"current_users\":1"), "body: {body}");
    Ok(())
}

#[tokio::test]
async fn room_endpoint_provisions_lazily() -> anyhow::Result<()> {
    let server = TestServer::spawn(18860, 18861).await?;

    let first = server.create_room("Fresh").await?;
    assert!(first.contains("\"created\":true"), "body: {first}");
    assert!(first.contains("\"title\":\"Room Fresh\""), "body: {first}");
    assert!(first.contains("\"max_users\":2"), "body: {first}");

    let second = server.create_room("Fresh").await?;
    assert!(second.contains("\"created\":false"), "body: {second}");
    Ok(())
}
