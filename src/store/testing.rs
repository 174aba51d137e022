//! Fault injection around [`MemoryStore`] for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::{KeyValueStore, MemoryStore, StoreError};

/// Delegates to a [`MemoryStore`], failing or stalling the named operations.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Make `operation` return a backend error.
    pub fn fail(&self, operation: &'static str) {
        self.failing
            .lock()
            .expect("fault set poisoned")
            .insert(operation);
    }

    /// Make `operation` sleep for `delay` before running.
    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.delays
            .lock()
            .expect("delay map poisoned")
            .insert(operation, delay);
    }

    async fn inject(&self, operation: &'static str) -> Result<(), StoreError> {
        let delay = self
            .delays
            .lock()
            .expect("delay map poisoned")
            .get(operation)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing
            .lock()
            .expect("fault set poisoned")
            .contains(operation)
        {
            return Err(StoreError::Backend(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inject("set_ex").await?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inject("set_nx").await?;
        self.inner.set_nx(key, value, ttl).await
    }

    async fn set_many_ex(&self, entries: &[(String, String, Duration)]) -> Result<(), StoreError> {
        self.inject("set_many_ex").await?;
        self.inner.set_many_ex(entries).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inject("get").await?;
        self.inner.get(key).await
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inject("get_del").await?;
        self.inner.get_del(key).await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.inject("del").await?;
        self.inner.del(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inject("exists").await?;
        self.inner.exists(key).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.inject("hash_set").await?;
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.inject("hash_get_all").await?;
        self.inner.hash_get_all(key).await
    }

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<(), StoreError> {
        self.inject("hash_del").await?;
        self.inner.hash_del(key, fields).await
    }

    async fn hash_upsert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        stale: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.inject("hash_upsert").await?;
        self.inner.hash_upsert(key, field, value, stale, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inject("expire").await?;
        self.inner.expire(key, ttl).await
    }

    async fn sliding_window_hit(
        &self,
        key: &str,
        now_millis: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError> {
        self.inject("sliding_window_hit").await?;
        self.inner
            .sliding_window_hit(key, now_millis, window, member)
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inject("ping").await?;
        self.inner.ping().await
    }
}
