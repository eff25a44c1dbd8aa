//! Redis state store backend.
//!
//! One multiplexed connection (`ConnectionManager`, which reconnects
//! transparently) shared by every session. The multi-key atomic sections
//! run as Lua scripts so concurrent coordinators on other processes see a
//! single linearization point per block.

use super::{GroupAcquire, Store};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script, Value};
use std::collections::HashMap;

/// Compare-and-delete: drop the lock and its reverse-index entry only when
/// the caller still owns it.
const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    redis.call('SREM', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

/// Compare-and-expire: refresh the TTL only for the current owner.
const PEXPIRE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Group acquire. KEYS = lock keys plus the reverse-index set key last;
/// ARGV = owner, ttl_ms, then the member names parallel to the lock keys.
/// Scans for a foreign holder first and mutates nothing on conflict.
const ACQUIRE_GROUP: &str = r#"
local owner = ARGV[1]
local ttl = tonumber(ARGV[2])
local setkey = KEYS[#KEYS]
for i = 1, #KEYS - 1 do
    local cur = redis.call('GET', KEYS[i])
    if cur and cur ~= owner then
        return {0, cur, ARGV[i + 2]}
    end
end
for i = 1, #KEYS - 1 do
    redis.call('SET', KEYS[i], owner, 'PX', ttl)
    redis.call('SADD', setkey, ARGV[i + 2])
end
return {1}
"#;

/// Group release. Same key/arg layout as ACQUIRE_GROUP minus the TTL.
/// Returns the members actually released.
const RELEASE_GROUP: &str = r#"
local owner = ARGV[1]
local setkey = KEYS[#KEYS]
local released = {}
for i = 1, #KEYS - 1 do
    if redis.call('GET', KEYS[i]) == owner then
        redis.call('DEL', KEYS[i])
        redis.call('SREM', setkey, ARGV[i + 1])
        released[#released + 1] = ARGV[i + 1]
    end
end
return released
"#;

/// Redis-backed [`Store`].
pub struct RedisStore {
    conn: ConnectionManager,
    delete_if_equals: Script,
    pexpire_if_equals: Script,
    acquire_group: Script,
    release_group: Script,
}

impl RedisStore {
    /// Connect to the store at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            delete_if_equals: Script::new(DELETE_IF_EQUALS),
            pexpire_if_equals: Script::new(PEXPIRE_IF_EQUALS),
            acquire_group: Script::new(ACQUIRE_GROUP),
            release_group: Script::new(RELEASE_GROUP),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_ms {
            cmd.arg("PX").arg(ttl);
        }
        // SET NX replies OK or nil.
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> StoreResult<bool> {
        let mut conn = self.conn();
        let set: bool = conn.pexpire(key, ttl_ms as i64).await?;
        Ok(set)
    }

    async fn pttl(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut conn = self.conn();
        // PTTL replies -2 (missing) or -1 (no expiry) as negative integers.
        let ttl: i64 = conn.pttl(key).await?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn();
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        Ok(conn.hdel(key, fields).await?)
    }

    async fn hlen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(conn.hlen(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
        set_key: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .delete_if_equals
            .key(key)
            .key(set_key)
            .arg(expected)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn pexpire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let refreshed: i64 = self
            .pexpire_if_equals
            .key(key)
            .arg(expected)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }

    async fn acquire_group(
        &self,
        lock_keys: &[String],
        members: &[String],
        set_key: &str,
        owner: &str,
        ttl_ms: u64,
    ) -> StoreResult<GroupAcquire> {
        if lock_keys.is_empty() {
            return Ok(GroupAcquire::Granted);
        }
        let mut conn = self.conn();
        let mut invocation = self.acquire_group.prepare_invoke();
        for key in lock_keys {
            invocation.key(key.as_str());
        }
        invocation.key(set_key);
        invocation.arg(owner).arg(ttl_ms);
        for member in members {
            invocation.arg(member.as_str());
        }
        let reply: Value = invocation.invoke_async(&mut conn).await?;
        parse_group_acquire(reply)
    }

    async fn release_group(
        &self,
        lock_keys: &[String],
        members: &[String],
        set_key: &str,
        owner: &str,
    ) -> StoreResult<Vec<String>> {
        if lock_keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let mut invocation = self.release_group.prepare_invoke();
        for key in lock_keys {
            invocation.key(key.as_str());
        }
        invocation.key(set_key);
        invocation.arg(owner);
        for member in members {
            invocation.arg(member.as_str());
        }
        Ok(invocation.invoke_async(&mut conn).await?)
    }
}

/// Decode the `{granted, owner?, block?}` array the acquire script returns.
fn parse_group_acquire(reply: Value) -> StoreResult<GroupAcquire> {
    let malformed = |reason: &str| StoreError::Malformed {
        key: "acquire_group".to_string(),
        reason: reason.to_string(),
    };

    let Value::Array(items) = reply else {
        return Err(malformed("expected array reply"));
    };
    let mut items = items.into_iter();

    match items.next() {
        Some(Value::Int(1)) => Ok(GroupAcquire::Granted),
        Some(Value::Int(0)) => {
            let owner = string_item(items.next()).ok_or_else(|| malformed("missing owner"))?;
            let block_id =
                string_item(items.next()).ok_or_else(|| malformed("missing block"))?;
            Ok(GroupAcquire::Conflict { block_id, owner })
        }
        _ => Err(malformed("missing status flag")),
    }
}

fn string_item(value: Option<Value>) -> Option<String> {
    match value? {
        Value::BulkString(bytes) => String::from_utf8(bytes).ok(),
        Value::SimpleString(s) => Some(s),
        _ => None,
    }
}
