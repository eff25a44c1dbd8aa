//! In-process state store backend.
//!
//! Single-node stand-in for Redis: every operation runs under one mutex,
//! which makes the compound sections trivially atomic. String entries carry
//! their expiry and are purged lazily on access, so TTL behavior matches
//! the remote backend as observed by callers.

use super::{GroupAcquire, Store};
use crate::error::StoreResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
}

impl Inner {
    /// Drop the string at `key` if its TTL has elapsed.
    fn purge(&mut self, key: &str) {
        if self.strings.get(key).is_some_and(StringEntry::expired) {
            self.strings.remove(key);
        }
    }

    fn live_value(&mut self, key: &str) -> Option<String> {
        self.purge(key);
        self.strings.get(key).map(|e| e.value.clone())
    }
}

/// In-memory [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn deadline(ttl_ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ttl_ms)
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl_ms.map(deadline),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().live_value(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let had_string = inner.strings.remove(key).is_some();
        let had_hash = inner.hashes.remove(key).is_some();
        let had_set = inner.sets.remove(key).is_some();
        Ok(had_string || had_hash || had_set)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        match inner.strings.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline(ttl_ms));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pttl(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let remaining = inner
            .strings
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64);
        Ok(remaining)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.inner.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let Some(hash) = inner.hashes.get_mut(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            if hash.remove(field).is_some() {
                removed += 1;
            }
        }
        if hash.is_empty() {
            inner.hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hlen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.inner.lock().hashes.get(key).map_or(0, |h| h.len() as u64))
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                inner.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .strings
            .iter()
            .filter(|(_, e)| e.expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.strings.remove(&key);
        }

        let mut keys: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.hashes.keys())
            .chain(inner.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
        set_key: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.live_value(key).as_deref() != Some(expected) {
            return Ok(false);
        }
        inner.strings.remove(key);
        if let Some(set) = inner.sets.get_mut(set_key) {
            set.remove(member);
            if set.is_empty() {
                inner.sets.remove(set_key);
            }
        }
        Ok(true)
    }

    async fn pexpire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.live_value(key).as_deref() != Some(expected) {
            return Ok(false);
        }
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.expires_at = Some(deadline(ttl_ms));
        }
        Ok(true)
    }

    async fn acquire_group(
        &self,
        lock_keys: &[String],
        members: &[String],
        set_key: &str,
        owner: &str,
        ttl_ms: u64,
    ) -> StoreResult<GroupAcquire> {
        let mut inner = self.inner.lock();
        for (key, member) in lock_keys.iter().zip(members) {
            if let Some(current) = inner.live_value(key) {
                if current != owner {
                    return Ok(GroupAcquire::Conflict {
                        block_id: member.clone(),
                        owner: current,
                    });
                }
            }
        }
        for (key, member) in lock_keys.iter().zip(members) {
            inner.strings.insert(
                key.clone(),
                StringEntry {
                    value: owner.to_string(),
                    expires_at: Some(deadline(ttl_ms)),
                },
            );
            inner
                .sets
                .entry(set_key.to_string())
                .or_default()
                .insert(member.clone());
        }
        Ok(GroupAcquire::Granted)
    }

    async fn release_group(
        &self,
        lock_keys: &[String],
        members: &[String],
        set_key: &str,
        owner: &str,
    ) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        let mut released = Vec::new();
        for (key, member) in lock_keys.iter().zip(members) {
            if inner.live_value(key).as_deref() == Some(owner) {
                inner.strings.remove(key);
                if let Some(set) = inner.sets.get_mut(set_key) {
                    set.remove(member);
                    if set.is_empty() {
                        inner.sets.remove(set_key);
                    }
                }
                released.push(member.clone());
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_respects_existing() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", None).await.expect("set"));
        assert!(!store.set_if_absent("k", "b", None).await.expect("set"));
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_string_reads_as_absent() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", Some(1)).await.expect("set"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("k").await.expect("get"), None);
        // And the slot is reusable.
        assert!(store.set_if_absent("k", "b", Some(1000)).await.expect("set"));
    }

    #[tokio::test]
    async fn pttl_reports_remaining() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "a", Some(10_000))
            .await
            .expect("set");
        let ttl = store.pttl("k").await.expect("pttl").expect("has ttl");
        assert!(ttl <= 10_000);
        assert!(ttl > 9_000);
        assert_eq!(store.pttl("missing").await.expect("pttl"), None);
    }

    #[tokio::test]
    async fn delete_if_equals_checks_owner() {
        let store = MemoryStore::new();
        store.set_if_absent("lock", "me", None).await.expect("set");
        store.sadd("idx", "b1").await.expect("sadd");

        assert!(
            !store
                .delete_if_equals("lock", "you", "idx", "b1")
                .await
                .expect("cad")
        );
        assert_eq!(store.smembers("idx").await.expect("smembers"), vec!["b1"]);

        assert!(
            store
                .delete_if_equals("lock", "me", "idx", "b1")
                .await
                .expect("cad")
        );
        assert_eq!(store.get("lock").await.expect("get"), None);
        assert!(store.smembers("idx").await.expect("smembers").is_empty());
    }

    #[tokio::test]
    async fn acquire_group_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .set_if_absent("locks:r:b2", "other", Some(10_000))
            .await
            .expect("set");

        let keys = vec!["locks:r:b1".to_string(), "locks:r:b2".to_string()];
        let members = vec!["b1".to_string(), "b2".to_string()];
        let outcome = store
            .acquire_group(&keys, &members, "clientlocks:r:me", "me", 10_000)
            .await
            .expect("acquire");
        assert_eq!(
            outcome,
            GroupAcquire::Conflict {
                block_id: "b2".to_string(),
                owner: "other".to_string(),
            }
        );
        // b1 must not have been taken.
        assert_eq!(store.get("locks:r:b1").await.expect("get"), None);
        assert!(
            store
                .smembers("clientlocks:r:me")
                .await
                .expect("smembers")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn scan_prefix_sees_all_kinds_and_skips_expired() {
        let store = MemoryStore::new();
        store.set_if_absent("locks:r:b1", "me", Some(1)).await.expect("set");
        store.set_if_absent("locks:r:b2", "me", None).await.expect("set");
        store.hset("online:r", "c1", "{}").await.expect("hset");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            store.scan_prefix("locks:r:").await.expect("scan"),
            vec!["locks:r:b2"]
        );
        assert_eq!(
            store.scan_prefix("online:").await.expect("scan"),
            vec!["online:r"]
        );
    }
}
