//! Redis remote tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, Script};
use tiercache_core::tier::namespace;
use tiercache_core::{CacheDescriptor, CacheValue, RemoteTier, RemoteTierFactory, Result};

use crate::error::RedisError;

/// Keys deleted per `DEL` while clearing a namespace.
const CLEAR_BATCH: usize = 500;

/// Atomic "set unless present, return what was there".
///
/// Equivalent to `SET key value NX GET EX ttl` on servers older than 7.0.
const PUT_IF_ABSENT_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
    return existing
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return false
"#;

/// One cache's namespace in Redis.
pub struct RedisRemoteTier {
    pool: Pool,
    namespace: String,
    put_if_absent: Script,
}

impl RedisRemoteTier {
    pub fn new(pool: Pool, cache_name: &str) -> Self {
        Self {
            pool,
            namespace: namespace(cache_name),
            put_if_absent: Script::new(PUT_IF_ABSENT_SCRIPT),
        }
    }

    #[inline]
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    async fn conn(&self) -> std::result::Result<Connection, RedisError> {
        Ok(self.pool.get().await?)
    }

    async fn clear_namespace(&self) -> std::result::Result<usize, RedisError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", escape_glob(&self.namespace));
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(CLEAR_BATCH)
                .query_async(&mut conn)
                .await?;

            for batch in keys.chunks(CLEAR_BATCH) {
                let removed: usize = conn.del(batch).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(deleted)
    }
}

#[async_trait]
impl RemoteTier for RedisRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let key = self.key(key);
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(&key).await.map_err(RedisError::from)?;
        Ok(value.map(Arc::new))
    }

    async fn put(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<()> {
        let key = self.key(key);
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(&key, value.as_slice(), ttl_secs(ttl))
            .await
            .map_err(RedisError::from)?;
        tracing::trace!(key = %key, ttl_secs = ttl_secs(ttl), "redis SET EX");
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<Option<CacheValue>> {
        let key = self.key(key);
        let mut conn = self.conn().await?;
        let previous: Option<Vec<u8>> = self
            .put_if_absent
            .key(&key)
            .arg(value.as_slice())
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(previous.map(Arc::new))
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        let key = self.key(key);
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(&key).await.map_err(RedisError::from)?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<()> {
        let deleted = self.clear_namespace().await?;
        tracing::debug!(namespace = %self.namespace, deleted, "redis namespace cleared");
        Ok(())
    }
}

/// Creates [`RedisRemoteTier`] handles sharing one pool.
#[derive(Clone)]
pub struct RedisRemoteFactory {
    pool: Pool,
}

impl RedisRemoteFactory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl RemoteTierFactory for RedisRemoteFactory {
    fn name(&self) -> &str {
        "redis"
    }

    fn create(&self, descriptor: &CacheDescriptor) -> Arc<dyn RemoteTier> {
        Arc::new(RedisRemoteTier::new(self.pool.clone(), &descriptor.name))
    }
}

/// Redis expiry in whole seconds, at least one.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Escape glob metacharacters so a namespace matches literally in `SCAN MATCH`.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("orders#lr::"), "orders#lr::");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn test_ttl_secs_rounds_up_to_one() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
    }
}
