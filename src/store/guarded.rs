//! Store wrapper that applies the shared circuit breaker and a per-call timeout.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{KeyValueStore, StoreError};
use crate::admission::circuit_breaker::{BreakerError, CircuitBreaker};

#[derive(Clone)]
pub struct GuardedStore {
    inner: Arc<dyn KeyValueStore>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl fmt::Debug for GuardedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedStore")
            .field("breaker", &self.breaker.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GuardedStore {
    #[must_use]
    pub fn new(
        inner: Arc<dyn KeyValueStore>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breaker,
            timeout,
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn guard<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout),
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(BreakerError::Open) => Err(StoreError::CircuitOpen),
            Err(BreakerError::Inner(err)) => {
                warn!(operation, "Store call failed: {err}");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for GuardedStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.guard("set_ex", || self.inner.set_ex(key, value, ttl))
            .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.guard("set_nx", || self.inner.set_nx(key, value, ttl))
            .await
    }

    async fn set_many_ex(&self, entries: &[(String, String, Duration)]) -> Result<(), StoreError> {
        self.guard("set_many_ex", || self.inner.set_many_ex(entries))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.guard("get", || self.inner.get(key)).await
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.guard("get_del", || self.inner.get_del(key)).await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.guard("del", || self.inner.del(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.guard("exists", || self.inner.exists(key)).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.guard("hash_set", || self.inner.hash_set(key, field, value))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.guard("hash_get_all", || self.inner.hash_get_all(key))
            .await
    }

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<(), StoreError> {
        self.guard("hash_del", || self.inner.hash_del(key, fields))
            .await
    }

    async fn hash_upsert(
        &self,
        key: &str,
        field: &str,
        value: &str,
        stale: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.guard("hash_upsert", || {
            self.inner.hash_upsert(key, field, value, stale, ttl)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.guard("expire", || self.inner.expire(key, ttl)).await
    }

    async fn sliding_window_hit(
        &self,
        key: &str,
        now_millis: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError> {
        self.guard("sliding_window_hit", || {
            self.inner
                .sliding_window_hit(key, now_millis, window, member)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.guard("ping", || self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::circuit_breaker::CircuitState;
    use crate::admission::FailurePolicy;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::revocation::RevocationRegistry;
    use crate::store::MemoryStore;
    use crate::store::testing::FaultyStore;
    use anyhow::Result;
    use secrecy::SecretString;

    fn guarded(threshold: u32) -> (GuardedStore, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let breaker = Arc::new(CircuitBreaker::new(
            "store",
            threshold,
            Duration::from_secs(30),
        ));
        let store = GuardedStore::new(memory.clone(), breaker, Duration::from_secs(1));
        (store, memory)
    }

    #[tokio::test(start_paused = true)]
    async fn failures_open_the_breaker() -> Result<()> {
        let (store, memory) = guarded(2);
        memory.set_unavailable(true);

        assert!(matches!(store.get("k").await, Err(StoreError::Backend(_))));
        assert!(matches!(store.get("k").await, Err(StoreError::Backend(_))));
        assert_eq!(store.breaker().state(), CircuitState::Open);

        // Backend is healthy again but the breaker short-circuits.
        memory.set_unavailable(false);
        assert!(matches!(store.get("k").await, Err(StoreError::CircuitOpen)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.get("k").await?, None);
        assert_eq!(store.breaker().state(), CircuitState::Closed);
        Ok(())
    }

    #[tokio::test]
    async fn passes_values_through() -> Result<()> {
        let (store, _memory) = guarded(5);
        store.set_ex("k", "v", Duration::from_secs(10)).await?;
        assert_eq!(store.get_del("k").await?.as_deref(), Some("v"));
        assert_eq!(store.get_del("k").await?, None);
        Ok(())
    }

    fn slow(threshold: u32) -> (GuardedStore, Arc<FaultyStore>) {
        let faulty = Arc::new(FaultyStore::new());
        let breaker = Arc::new(CircuitBreaker::new(
            "store",
            threshold,
            Duration::from_secs(30),
        ));
        let store = GuardedStore::new(faulty.clone(), breaker, Duration::from_secs(1));
        (store, faulty)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_and_count_as_failures() -> Result<()> {
        let (store, faulty) = slow(2);
        faulty.delay("get_del", Duration::from_secs(5));
        store.set_ex("k", "v", Duration::from_secs(60)).await?;

        assert!(matches!(store.get_del("k").await, Err(StoreError::Timeout)));
        assert_eq!(store.breaker().failure_count(), 1);
        assert_eq!(store.breaker().state(), CircuitState::Closed);

        assert!(matches!(store.get_del("k").await, Err(StoreError::Timeout)));
        assert_eq!(store.breaker().state(), CircuitState::Open);
        assert!(matches!(store.get_del("k").await, Err(StoreError::CircuitOpen)));

        // The timed-out calls never reached the backend.
        assert_eq!(faulty.memory().get("k").await?.as_deref(), Some("v"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_revocation_check_follows_failure_policy() -> Result<()> {
        let (store, faulty) = slow(100);
        faulty.delay("exists", Duration::from_secs(5));
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let config = EngineConfig::new(SecretString::from("x".repeat(40)));

        let registry = RevocationRegistry::new(Arc::new(store.clone()), clock.clone(), &config);
        assert!(registry.is_revoked("jti").await);

        let config = config.with_revocation_failure_policy(FailurePolicy::FailOpen);
        let registry = RevocationRegistry::new(Arc::new(store.clone()), clock, &config);
        assert!(!registry.is_revoked("jti").await);
        assert_eq!(store.breaker().failure_count(), 2);
        Ok(())
    }
}
