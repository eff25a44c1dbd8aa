//! Shared state store.
//!
//! Everything cross-connection (locks, reverse indexes, presence, document
//! snapshots, room directory scans) lives behind the [`Store`] trait so the
//! coordinator stays horizontally scalable: any number of server processes
//! can share one backing store.
//!
//! Two backends:
//! - [`redis::RedisStore`] — the production backend. The multi-key atomic
//!   sections run as server-side Lua scripts.
//! - [`memory::MemoryStore`] — an in-process backend where one mutex is the
//!   atomic section. Used by the test suites and for single-node runs.
//!
//! Every method is atomic per call. Compound operations
//! ([`Store::delete_if_equals`], [`Store::acquire_group`], ...) are single
//! atomic steps on both backends; callers never read-modify-write.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a group lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAcquire {
    /// Every requested key was set to the owner.
    Granted,
    /// A key was held by someone else; nothing was mutated.
    Conflict {
        /// The contested block.
        block_id: String,
        /// Its current holder.
        owner: String,
    },
}

/// The key-value contract the coordinator runs on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Set `key` only if it does not exist, with an optional TTL.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: Option<u64>)
        -> StoreResult<bool>;

    /// Unconditionally set `key` (no TTL).
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Read a string key.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete a key of any kind. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Set a TTL on an existing key. Returns false when the key is absent.
    async fn pexpire(&self, key: &str, ttl_ms: u64) -> StoreResult<bool>;

    /// Remaining TTL of a key in milliseconds. `None` when the key is
    /// absent or has no expiry.
    async fn pttl(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Set a hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Read a hash field.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Read a whole hash.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Delete hash fields. Returns the number removed.
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64>;

    /// Number of fields in a hash.
    async fn hlen(&self, key: &str) -> StoreResult<u64>;

    /// Add a set member.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Read all set members.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove a set member.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;

    /// All keys starting with `prefix`. Best-effort snapshot: entries may
    /// expire between the scan and a subsequent read.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Atomic multi-key sections
    // ------------------------------------------------------------------

    /// If `key` currently holds `expected`: delete it and remove `member`
    /// from the set at `set_key`, returning true. Otherwise mutate nothing.
    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
        set_key: &str,
        member: &str,
    ) -> StoreResult<bool>;

    /// If `key` currently holds `expected`, set its TTL to `ttl_ms`.
    async fn pexpire_if_equals(&self, key: &str, expected: &str, ttl_ms: u64)
        -> StoreResult<bool>;

    /// Group acquire: if any of `lock_keys` holds a value other than
    /// `owner`, return the first conflict without mutation. Otherwise set
    /// every key to `owner` with `ttl_ms` and add every corresponding
    /// member of `members` to the set at `set_key`.
    ///
    /// `lock_keys` and `members` are parallel slices of equal length.
    async fn acquire_group(
        &self,
        lock_keys: &[String],
        members: &[String],
        set_key: &str,
        owner: &str,
        ttl_ms: u64,
    ) -> StoreResult<GroupAcquire>;

    /// Group release: for each of `lock_keys` holding `owner`, delete it
    /// and remove the corresponding member from the set at `set_key`.
    /// Returns the members actually released.
    async fn release_group(
        &self,
        lock_keys: &[String],
        members: &[String],
        set_key: &str,
        owner: &str,
    ) -> StoreResult<Vec<String>>;
}

/// Connect the backend named by the configuration.
pub async fn connect(config: &crate::config::StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.backend.as_str() {
        "redis" => {
            let url = config.effective_url();
            tracing::info!(url = %url, "Connecting Redis state store");
            let store = RedisStore::connect(&url).await?;
            Ok(Arc::new(store))
        }
        "memory" => {
            tracing::info!("Using in-process memory state store");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(anyhow::anyhow!("unknown store backend: {other}")),
    }
}
