//! Key-value store abstraction.
//!
//! Every operation the engine needs is a single round trip, so a caller that
//! is cancelled mid-call leaves either the whole mutation or none of it.

mod guarded;
mod memory;
mod redis_store;
#[cfg(test)]
pub(crate) mod testing;

pub use self::guarded::GuardedStore;
pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("store circuit open")]
    CircuitOpen,
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("invalid stored value")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set `key` only if it does not exist yet. Returns `true` for the one
    /// caller that wrote it.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Write every `(key, value, ttl)` entry in one atomic step.
    async fn set_many_ex(&self, entries: &[(String, String, Duration)]) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read and delete `key` in one atomic step.
    ///
    /// Of any number of concurrent callers, at most one sees `Some`.
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Returns `true` if something was deleted.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<(), StoreError>;

    /// Set `field`, drop `stale` fields and reset the hash TTL atomically, so
    /// a hash written here always carries an expiry.
    async fn hash_upsert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        stale: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Record one hit in a sliding window and return the hits inside it.
    ///
    /// Drops members scored at or before `now_millis - window`, adds `member`
    /// scored `now_millis`, counts what is left and sets the key to expire
    /// after `window`, all atomically.
    async fn sliding_window_hit(
        &self,
        key: &str,
        now_millis: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
