//! Redis-backed store.
//!
//! Single-use reads rely on `GETDEL` (Redis 6.2+); the sliding window runs as
//! one `MULTI`/`EXEC` pipeline.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{Instrument, info_span, instrument};

use super::{KeyValueStore, StoreError, duration_millis};

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url` (`redis://` or `rediss://`).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn span(operation: &'static str) -> tracing::Span {
    info_span!("redis.command", db.system = "redis", db.operation = operation)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(duration_millis(ttl).max(1))
            .query_async(&mut conn)
            .instrument(span("SET"))
            .await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let written: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(duration_millis(ttl).max(1))
            .arg("NX")
            .query_async(&mut conn)
            .instrument(span("SET"))
            .await?;
        Ok(written.is_some())
    }

    async fn set_many_ex(&self, entries: &[(String, String, Duration)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value, ttl) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(duration_millis(*ttl).max(1))
                .ignore();
        }
        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .instrument(span("MULTI"))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("GET"))
            .await?;
        Ok(value)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("GETDEL"))
            .await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("DEL"))
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("EXISTS"))
            .await?;
        Ok(found > 0)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .instrument(span("HSET"))
            .await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span("HGETALL"))
            .await?;
        Ok(map)
    }

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HDEL")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .instrument(span("HDEL"))
            .await?;
        Ok(())
    }

    async fn hash_upsert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        stale: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let stale: Vec<&String> = stale.iter().filter(|old| old.as_str() != field).collect();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key).arg(field).arg(value).ignore();
        if !stale.is_empty() {
            pipe.cmd("HDEL").arg(key).arg(stale).ignore();
        }
        pipe.cmd("PEXPIRE")
            .arg(key)
            .arg(duration_millis(ttl).max(1))
            .ignore();
        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .instrument(span("MULTI"))
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(duration_millis(ttl).max(1))
            .query_async(&mut conn)
            .instrument(span("PEXPIRE"))
            .await?;
        Ok(())
    }

    async fn sliding_window_hit(
        &self,
        key: &str,
        now_millis: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError> {
        let window_millis = duration_millis(window).max(1);
        let cutoff = now_millis.saturating_sub(i64::try_from(window_millis).unwrap_or(i64::MAX));
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_millis)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_millis)
            .ignore()
            .query_async(&mut conn)
            .instrument(span("MULTI"))
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .instrument(span("PING"))
            .await?;
        Ok(())
    }
}
