//! Room presence registry.
//!
//! One hash per room, `online:{room_id}`, mapping `client_id` to a JSON
//! entry `{nickname, color, lastSeen}`. Liveness is heartbeat-driven:
//! entries whose `lastSeen` is older than the TTL are pruned before any
//! count or list read, so a ghost user never blocks admission for longer
//! than the TTL.

use crate::error::StoreResult;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default presence TTL in seconds.
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 30;

/// A presence entry as stored in the room hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Display name.
    pub nickname: String,
    /// Assigned palette color.
    pub color: String,
    /// Unix seconds of the last heartbeat or write.
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
}

/// An online user, as reported by [`PresenceRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    /// The session id.
    pub client_id: String,
    /// Display name.
    pub nickname: String,
    /// Assigned palette color.
    pub color: String,
}

/// Handle over the shared store for presence operations.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn Store>,
    ttl_secs: u64,
}

fn online_key(room_id: &str) -> String {
    format!("online:{room_id}")
}

impl PresenceRegistry {
    /// Create a registry with the given entry TTL.
    pub fn new(store: Arc<dyn Store>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Register a user as online in the room.
    pub async fn add(
        &self,
        room_id: &str,
        client_id: &str,
        nickname: &str,
        color: &str,
    ) -> StoreResult<()> {
        self.write_entry(room_id, client_id, nickname, color).await
    }

    /// Refresh a user's `lastSeen`. Rewrites the whole entry, so a touch
    /// after an eviction simply resurrects the user.
    pub async fn touch(
        &self,
        room_id: &str,
        client_id: &str,
        nickname: &str,
        color: &str,
    ) -> StoreResult<()> {
        self.write_entry(room_id, client_id, nickname, color).await
    }

    async fn write_entry(
        &self,
        room_id: &str,
        client_id: &str,
        nickname: &str,
        color: &str,
    ) -> StoreResult<()> {
        let entry = PresenceEntry {
            nickname: nickname.to_string(),
            color: color.to_string(),
            last_seen: chrono::Utc::now().timestamp(),
        };
        let payload = serde_json::to_string(&entry).map_err(|e| {
            crate::error::StoreError::Malformed {
                key: online_key(room_id),
                reason: e.to_string(),
            }
        })?;
        self.store
            .hset(&online_key(room_id), client_id, &payload)
            .await
    }

    /// Remove a user from the room.
    pub async fn remove(&self, room_id: &str, client_id: &str) -> StoreResult<()> {
        self.store
            .hdel(&online_key(room_id), &[client_id.to_string()])
            .await?;
        Ok(())
    }

    /// Number of live users in the room, after pruning.
    pub async fn count(&self, room_id: &str) -> StoreResult<u64> {
        self.prune(room_id).await?;
        self.store.hlen(&online_key(room_id)).await
    }

    /// Live users in the room, after pruning.
    pub async fn list(&self, room_id: &str) -> StoreResult<Vec<OnlineUser>> {
        self.prune(room_id).await?;
        let entries = self.store.hgetall(&online_key(room_id)).await?;
        let mut users: Vec<OnlineUser> = entries
            .into_iter()
            .filter_map(|(client_id, raw)| {
                let entry: PresenceEntry = serde_json::from_str(&raw).ok()?;
                Some(OnlineUser {
                    client_id,
                    nickname: entry.nickname,
                    color: entry.color,
                })
            })
            .collect();
        users.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(users)
    }

    /// Drop entries older than the TTL, along with anything unparseable.
    pub async fn prune(&self, room_id: &str) -> StoreResult<u64> {
        let key = online_key(room_id);
        let entries = self.store.hgetall(&key).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let stale: Vec<String> = entries
            .into_iter()
            .filter_map(|(client_id, raw)| {
                match serde_json::from_str::<PresenceEntry>(&raw) {
                    Ok(entry) if now - entry.last_seen <= self.ttl_secs as i64 => None,
                    _ => Some(client_id),
                }
            })
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }
        tracing::debug!(room = %room_id, count = stale.len(), "Pruning stale presence entries");
        self.store.hdel(&key, &stale).await
    }
}
