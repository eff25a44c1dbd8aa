//! Block lock manager.
//!
//! Per-block exclusive edit rights, held in the shared state store:
//!
//! - `locks:{room_id}:{block_id}` → owner `client_id`, with a TTL so a
//!   crashed client can hold a block for at most the lock TTL.
//! - `clientlocks:{room_id}:{client_id}` → set of held block ids, the
//!   reverse index that makes disconnect cleanup O(held locks).
//!
//! All mutation goes through the store's atomic sections; the manager
//! never read-modify-writes a lock key. An expired lock that still sits in
//! a reverse index is tolerated everywhere: acquisition treats the block
//! as free and release finds nothing to compare-and-delete.

use crate::error::StoreResult;
use crate::store::{GroupAcquire, Store};
use std::collections::HashMap;
use std::sync::Arc;

/// Default lock TTL in milliseconds.
pub const DEFAULT_LOCK_TTL_MS: u64 = 10_000;

/// Outcome of a single-block acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// Whether the caller now owns the block.
    pub granted: bool,
    /// On denial, the current owner if it could still be read. A lock can
    /// expire between the failed set and the owner read; callers tolerate
    /// `None`.
    pub current_owner: Option<String>,
}

/// Outcome of a group acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)] // Group surface; no inbound message drives it yet
pub struct GroupAcquireOutcome {
    /// Whether every requested block was granted.
    pub granted: bool,
    /// On conflict, the holder of the first contested block.
    pub conflict_owner: Option<String>,
    /// On conflict, the first contested block.
    pub conflict_block: Option<String>,
}

/// Handle over the shared store for lock operations. One per process,
/// injected into every session.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn Store>,
    default_ttl_ms: u64,
}

fn lock_key(room_id: &str, block_id: &str) -> String {
    format!("locks:{room_id}:{block_id}")
}

fn client_locks_key(room_id: &str, client_id: &str) -> String {
    format!("clientlocks:{room_id}:{client_id}")
}

impl LockManager {
    /// Create a manager with the given default TTL.
    pub fn new(store: Arc<dyn Store>, default_ttl_ms: u64) -> Self {
        Self {
            store,
            default_ttl_ms,
        }
    }

    /// Try to acquire one block for `client_id`.
    ///
    /// First-wins through the store's set-if-absent; re-acquiring a block
    /// already held by the same client is denied the same way any held
    /// block is (the original owner keeps its TTL).
    pub async fn acquire(
        &self,
        room_id: &str,
        block_id: &str,
        client_id: &str,
        ttl_ms: Option<u64>,
    ) -> StoreResult<AcquireOutcome> {
        let key = lock_key(room_id, block_id);
        let ttl = ttl_ms.unwrap_or(self.default_ttl_ms);

        if self.store.set_if_absent(&key, client_id, Some(ttl)).await? {
            self.store
                .sadd(&client_locks_key(room_id, client_id), block_id)
                .await?;
            return Ok(AcquireOutcome {
                granted: true,
                current_owner: None,
            });
        }

        let current_owner = self.store.get(&key).await?;
        Ok(AcquireOutcome {
            granted: false,
            current_owner,
        })
    }

    /// Atomically acquire a set of blocks, all or nothing.
    ///
    /// Blank block ids are filtered out; an empty request (or one that is
    /// empty after filtering) is trivially granted. A blank client id is
    /// refused without touching the store.
    #[allow(dead_code)] // Group surface; no inbound message drives it yet
    pub async fn acquire_group(
        &self,
        room_id: &str,
        block_ids: &[String],
        client_id: &str,
        ttl_ms: Option<u64>,
    ) -> StoreResult<GroupAcquireOutcome> {
        if client_id.is_empty() {
            return Ok(GroupAcquireOutcome {
                granted: false,
                conflict_owner: None,
                conflict_block: None,
            });
        }

        let members: Vec<String> = block_ids
            .iter()
            .filter(|b| !b.is_empty())
            .cloned()
            .collect();
        if members.is_empty() {
            return Ok(GroupAcquireOutcome {
                granted: true,
                conflict_owner: None,
                conflict_block: None,
            });
        }

        let keys: Vec<String> = members.iter().map(|b| lock_key(room_id, b)).collect();
        let outcome = self
            .store
            .acquire_group(
                &keys,
                &members,
                &client_locks_key(room_id, client_id),
                client_id,
                ttl_ms.unwrap_or(self.default_ttl_ms),
            )
            .await?;

        Ok(match outcome {
            GroupAcquire::Granted => GroupAcquireOutcome {
                granted: true,
                conflict_owner: None,
                conflict_block: None,
            },
            GroupAcquire::Conflict { block_id, owner } => GroupAcquireOutcome {
                granted: false,
                conflict_owner: Some(owner),
                conflict_block: Some(block_id),
            },
        })
    }

    /// Release one block if `client_id` still owns it. Non-owners and
    /// already-expired locks return false without side effects.
    pub async fn release(
        &self,
        room_id: &str,
        block_id: &str,
        client_id: &str,
    ) -> StoreResult<bool> {
        self.store
            .delete_if_equals(
                &lock_key(room_id, block_id),
                client_id,
                &client_locks_key(room_id, client_id),
                block_id,
            )
            .await
    }

    /// Release several blocks; returns the subset actually released.
    pub async fn release_group(
        &self,
        room_id: &str,
        block_ids: &[String],
        client_id: &str,
    ) -> StoreResult<Vec<String>> {
        let members: Vec<String> = block_ids
            .iter()
            .filter(|b| !b.is_empty())
            .cloned()
            .collect();
        if members.is_empty() || client_id.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = members.iter().map(|b| lock_key(room_id, b)).collect();
        self.store
            .release_group(&keys, &members, &client_locks_key(room_id, client_id), client_id)
            .await
    }

    /// Release everything `client_id` holds in the room and drop its
    /// reverse index. Disconnect-time cleanup; an empty index is fine.
    pub async fn release_all(&self, room_id: &str, client_id: &str) -> StoreResult<Vec<String>> {
        let set_key = client_locks_key(room_id, client_id);
        let held = self.store.smembers(&set_key).await?;
        let released = self.release_group(room_id, &held, client_id).await?;
        self.store.delete(&set_key).await?;
        Ok(released)
    }

    /// Refresh the TTL of one held block. No-op returning false for
    /// non-owners.
    #[allow(dead_code)] // A drag-refresh message would drive this
    pub async fn refresh_ttl(
        &self,
        room_id: &str,
        block_id: &str,
        client_id: &str,
        ttl_ms: Option<u64>,
    ) -> StoreResult<bool> {
        self.store
            .pexpire_if_equals(
                &lock_key(room_id, block_id),
                client_id,
                ttl_ms.unwrap_or(self.default_ttl_ms),
            )
            .await
    }

    /// Refresh every lock `client_id` holds; returns how many were still
    /// owned and refreshed.
    #[allow(dead_code)] // A drag-refresh message would drive this
    pub async fn refresh_all(
        &self,
        room_id: &str,
        client_id: &str,
        ttl_ms: Option<u64>,
    ) -> StoreResult<u64> {
        let held = self.store.smembers(&client_locks_key(room_id, client_id)).await?;
        let mut refreshed = 0;
        for block_id in &held {
            if self.refresh_ttl(room_id, block_id, client_id, ttl_ms).await? {
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Current owner of a block, if any.
    pub async fn get_owner(&self, room_id: &str, block_id: &str) -> StoreResult<Option<String>> {
        self.store.get(&lock_key(room_id, block_id)).await
    }

    /// Remaining TTL of a held lock in milliseconds, 0 when unknown.
    pub async fn remaining_ttl_ms(&self, room_id: &str, block_id: &str) -> StoreResult<u64> {
        Ok(self
            .store
            .pttl(&lock_key(room_id, block_id))
            .await?
            .unwrap_or(0))
    }

    /// Best-effort snapshot of every held lock in the room,
    /// `block_id → owner`. Entries expiring mid-scan are omitted.
    pub async fn get_all_locks(
        &self,
        room_id: &str,
    ) -> StoreResult<HashMap<String, String>> {
        let prefix = format!("locks:{room_id}:");
        let mut locks = HashMap::new();
        for key in self.store.scan_prefix(&prefix).await? {
            let Some(block_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(owner) = self.store.get(&key).await? {
                locks.insert(block_id.to_string(), owner);
            }
        }
        Ok(locks)
    }
}
