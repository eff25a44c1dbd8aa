//! Message envelopes exchanged over a workspace session.
//!
//! Every frame is a JSON object `{"t": <TYPE>, "payload": <object>}`. The
//! two directions have disjoint type sets: clients send lock requests,
//! commits, and heartbeats; the server sends state snapshots and fan-out
//! notifications. Payload fields are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A message received from a client.
///
/// Decoding is strict on the envelope (both `t` and `payload` must be
/// present, and `t` must name a known type) and lenient inside `payload`
/// (unknown fields are ignored). Frames that fail to decode are dropped
/// by the coordinator without a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "payload")]
pub enum ClientMessage {
    /// Request exclusive edit rights on one block.
    #[serde(rename = "LOCK_ACQUIRE")]
    LockAcquire(LockAcquirePayload),
    /// Apply a mutation to a locked block, optionally releasing the lock
    /// and persisting a fresh document snapshot.
    #[serde(rename = "COMMIT")]
    Commit(CommitPayload),
    /// Liveness signal; refreshes the sender's presence entry.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {},
}

/// Payload of `LOCK_ACQUIRE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquirePayload {
    /// The block to lock.
    pub block_id: String,
}

/// Payload of `COMMIT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPayload {
    /// The block the mutation applies to.
    pub block_id: String,
    /// Opaque mutation events, fanned out verbatim.
    #[serde(default)]
    pub events: Vec<Value>,
    /// Serialized document snapshot to persist, if the client sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_xml: Option<String>,
    /// Whether the commit also releases the block lock. Defaults to true.
    #[serde(default = "default_true")]
    pub release_lock: bool,
}

fn default_true() -> bool {
    true
}

/// A message sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "payload")]
pub enum ServerMessage {
    /// Initial room snapshot, sent once right after admission.
    #[serde(rename = "INIT_STATE")]
    InitState {
        /// The server-assigned id for the receiving session.
        #[serde(rename = "clientId")]
        client_id: String,
        /// Other users currently online in the room.
        users: Vec<UserInfo>,
        /// Current block ownership, `block_id -> client_id`.
        locks: BTreeMap<String, String>,
        /// Latest document snapshot, omitted when the room has none.
        #[serde(
            rename = "workspaceXml",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        workspace_xml: Option<String>,
    },
    /// A block changed owner. `owner` is null when the lock was released.
    #[serde(rename = "LOCK_UPDATE")]
    LockUpdate {
        /// The block whose ownership changed.
        #[serde(rename = "blockId")]
        block_id: String,
        /// The new owner, or null on release.
        owner: Option<String>,
    },
    /// A lock request was refused; sent only to the requester.
    #[serde(rename = "LOCK_DENIED")]
    LockDenied {
        /// The contested block.
        #[serde(rename = "blockId")]
        block_id: String,
        /// The current holder. Null when the lock expired between the
        /// denial and the owner read; requesters tolerate it and retry.
        owner: Option<String>,
        /// Remaining holder TTL in milliseconds (0 when unknown).
        #[serde(rename = "ttlMs")]
        ttl_ms: u64,
    },
    /// A committed mutation, fanned out to the whole room.
    #[serde(rename = "COMMIT_APPLY")]
    CommitApply {
        /// The mutated block.
        #[serde(rename = "blockId")]
        block_id: String,
        /// The opaque event list from the commit.
        events: Vec<Value>,
        /// The committing client.
        by: String,
        /// Snapshot carried by the commit, omitted when absent.
        #[serde(
            rename = "workspaceXml",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        workspace_xml: Option<String>,
    },
    /// A peer joined the room. Never delivered to the joiner itself.
    #[serde(rename = "USER_JOINED")]
    UserJoined {
        /// The joining session.
        #[serde(rename = "clientId")]
        client_id: String,
        /// The joiner's display name.
        nickname: String,
        /// The joiner's assigned palette color.
        color: String,
    },
    /// A peer left the room. Never delivered to the leaver itself.
    #[serde(rename = "USER_LEFT")]
    UserLeft {
        /// The departed session.
        #[serde(rename = "clientId")]
        client_id: String,
    },
}

/// A user entry inside `INIT_STATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// The session id.
    pub client_id: String,
    /// Display name.
    pub nickname: String,
    /// Assigned palette color.
    pub color: String,
}

impl ClientMessage {
    /// Decode an inbound text frame. Returns `None` for anything that is
    /// not a well-formed envelope of a known type; callers drop such
    /// frames silently.
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

impl ServerMessage {
    /// Encode for transmission.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
