//! Phase 1 + 2: admission checks and room-state activation.

use super::{snapshot_key, Session, WsSink};
use crate::db::RoomRecord;
use crate::error::{SessionError, SessionResult};
use crate::store::Store;
use blockshare_proto::{ServerMessage, UserInfo};
use futures_util::SinkExt;
use rand::Rng;
use std::collections::BTreeMap;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// The fixed 12-color palette sessions draw from.
pub(super) const COLOR_PALETTE: [&str; 12] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
    "#F8B739", "#52B788", "#E63946", "#457B9D",
];

/// Pick a palette color uniformly at random.
pub(super) fn random_color() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..COLOR_PALETTE.len());
    COLOR_PALETTE[idx]
}

/// Synthesize a nickname when the handshake query carried none.
pub(super) fn fallback_nickname() -> String {
    format!("User{}", rand::thread_rng().gen_range(1000..10_000))
}

/// Admission: the room must exist and have a free slot. No state is
/// mutated; stale presence is pruned opportunistically before counting.
pub(super) async fn admit(session: &Session) -> SessionResult<RoomRecord> {
    let room = session
        .hub
        .db
        .find_room(&session.room_id)
        .await?
        .ok_or_else(|| SessionError::RoomNotFound(session.room_id.clone()))?;

    let online = session.hub.presence.count(&session.room_id).await?;
    if online >= u64::from(room.max_users) {
        return Err(SessionError::RoomFull(session.room_id.clone()));
    }

    Ok(room)
}

/// Activation: register presence, snapshot the room to the client, and
/// announce the join.
pub(super) async fn activate(session: &Session, ws_tx: &mut WsSink) -> SessionResult<()> {
    session
        .hub
        .presence
        .add(
            &session.room_id,
            &session.client_id,
            &session.nickname,
            &session.color,
        )
        .await?;

    let init = build_init_state(session).await?;
    send_message(ws_tx, &init).await?;

    session.hub.bus.publish(
        &session.room_id,
        crate::bus::Event::UserJoined {
            client_id: session.client_id.clone(),
            nickname: session.nickname.clone(),
            color: session.color.clone(),
        },
    );
    Ok(())
}

/// Assemble `INIT_STATE`: peers, the lock map, and the latest snapshot.
///
/// The lock scan and snapshot read are resilient: a store hiccup degrades
/// to an empty map / no snapshot rather than killing the session.
async fn build_init_state(session: &Session) -> SessionResult<ServerMessage> {
    let users: Vec<UserInfo> = session
        .hub
        .presence
        .list(&session.room_id)
        .await?
        .into_iter()
        .filter(|user| user.client_id != session.client_id)
        .map(|user| UserInfo {
            client_id: user.client_id,
            nickname: user.nickname,
            color: user.color,
        })
        .collect();

    let locks: BTreeMap<String, String> =
        match session.hub.locks.get_all_locks(&session.room_id).await {
            Ok(locks) => locks.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Lock enumeration failed - sending empty snapshot");
                BTreeMap::new()
            }
        };

    let workspace_xml = match session.hub.store.get(&snapshot_key(&session.room_id)).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Snapshot read failed - omitting workspaceXml");
            None
        }
    };

    debug!(
        users = users.len(),
        locks = locks.len(),
        has_snapshot = workspace_xml.is_some(),
        "Sending INIT_STATE"
    );

    Ok(ServerMessage::InitState {
        client_id: session.client_id.clone(),
        users,
        locks,
        workspace_xml,
    })
}

/// Encode and send one server message on this connection.
pub(super) async fn send_message(ws_tx: &mut WsSink, msg: &ServerMessage) -> SessionResult<()> {
    let text = match msg.encode() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Dropping unencodable server message");
            return Ok(());
        }
    };
    ws_tx.send(WsMessage::Text(text)).await?;
    Ok(())
}
