//! Inbound message handlers.
//!
//! A handler error never ends the session: store failures are logged and
//! the handler aborts, leaving the connection live. Only a failed write
//! back to the requester (LOCK_DENIED) surfaces to the event loop.

use super::{handshake, snapshot_key, Session, WsSink};
use crate::bus::Event;
use crate::store::Store;
use blockshare_proto::{CommitPayload, LockAcquirePayload, ServerMessage};
use tracing::{debug, warn};

/// `LOCK_ACQUIRE`: try to take the block. Success fans `LOCK_UPDATE` out
/// to the room; denial answers only this connection with `LOCK_DENIED`
/// and the holder's remaining TTL.
pub(super) async fn handle_acquire(
    session: &Session,
    payload: LockAcquirePayload,
    ws_tx: &mut WsSink,
) -> crate::error::SessionResult<()> {
    let block_id = payload.block_id;
    if block_id.is_empty() {
        return Ok(());
    }

    let outcome = match session
        .hub
        .locks
        .acquire(&session.room_id, &block_id, &session.client_id, None)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(block = %block_id, error = %e, "Lock acquire failed");
            return Ok(());
        }
    };

    if outcome.granted {
        crate::metrics::LOCKS_GRANTED.inc();
        session.hub.bus.publish(
            &session.room_id,
            Event::LockUpdate {
                block_id,
                owner: Some(session.client_id.clone()),
            },
        );
        return Ok(());
    }

    crate::metrics::LOCKS_DENIED.inc();
    let ttl_ms = session
        .hub
        .locks
        .remaining_ttl_ms(&session.room_id, &block_id)
        .await
        .unwrap_or(0);
    debug!(block = %block_id, owner = ?outcome.current_owner, ttl_ms, "Lock denied");

    handshake::send_message(
        ws_tx,
        &ServerMessage::LockDenied {
            block_id,
            owner: outcome.current_owner,
            ttl_ms,
        },
    )
    .await
}

/// `COMMIT`: apply a mutation to a block.
///
/// Ordering is part of the contract: the lock is released before the
/// commit fans out, and `LOCK_UPDATE(null)` follows `COMMIT_APPLY`, so
/// every observer sees a consistent (document, lock) transition.
pub(super) async fn handle_commit(session: &Session, payload: CommitPayload) {
    let CommitPayload {
        block_id,
        events,
        workspace_xml,
        release_lock,
    } = payload;
    if block_id.is_empty() {
        return;
    }
    // An empty snapshot is treated as absent, both for persistence and in
    // the fan-out payload.
    let workspace_xml = workspace_xml.filter(|xml| !xml.is_empty());

    // A live foreign lock means this commit is stale; drop it silently.
    match session
        .hub
        .locks
        .get_owner(&session.room_id, &block_id)
        .await
    {
        Ok(Some(owner)) if owner != session.client_id => {
            debug!(block = %block_id, owner = %owner, "Dropping commit from non-owner");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(block = %block_id, error = %e, "Owner check failed - dropping commit");
            return;
        }
    }

    if release_lock {
        if let Err(e) = session
            .hub
            .locks
            .release(&session.room_id, &block_id, &session.client_id)
            .await
        {
            warn!(block = %block_id, error = %e, "Lock release failed - dropping commit");
            return;
        }
    }

    if let Some(xml) = workspace_xml.as_deref() {
        if let Err(e) = session
            .hub
            .store
            .set(&snapshot_key(&session.room_id), xml)
            .await
        {
            warn!(error = %e, "Snapshot write failed - dropping commit");
            return;
        }
    }

    crate::metrics::COMMITS_APPLIED.inc();
    session.hub.bus.publish(
        &session.room_id,
        Event::CommitApply {
            block_id: block_id.clone(),
            events,
            by: session.client_id.clone(),
            workspace_xml,
        },
    );

    if release_lock {
        session.hub.bus.publish(
            &session.room_id,
            Event::LockUpdate {
                block_id,
                owner: None,
            },
        );
    }
}

/// `HEARTBEAT`: refresh this session's presence entry.
pub(super) async fn handle_heartbeat(session: &Session) {
    if let Err(e) = session
        .hub
        .presence
        .touch(
            &session.room_id,
            &session.client_id,
            &session.nickname,
            &session.color,
        )
        .await
    {
        warn!(error = %e, "Presence touch failed");
    }
}
