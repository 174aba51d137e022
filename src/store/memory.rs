//! In-process store for tests and single-node development.
//!
//! Expiry uses `tokio::time::Instant`, so tests running with a paused clock can
//! move TTLs forward with `tokio::time::advance`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{KeyValueStore, StoreError, duration_millis};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
    Window(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Live keys, for assertions.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of `key`, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("memory store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

fn wrong_type() -> StoreError {
    StoreError::Backend("WRONGTYPE operation against a key holding the wrong kind of value".into())
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn set_many_ex(&self, batch: &[(String, String, Duration)]) -> Result<(), StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        for (key, value, ttl) in batch {
            entries.insert(
                key.clone(),
                Entry {
                    value: Value::Text(value.clone()),
                    expires_at: Some(now + *ttl),
                },
            );
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        match entries.get(key).map(|entry| &entry.value) {
            None => return Ok(None),
            Some(Value::Text(_)) => {}
            Some(_) => return Err(wrong_type()),
        }
        match entries.remove(key).map(|entry| entry.value) {
            Some(Value::Text(text)) => Ok(Some(text)),
            _ => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(map) => {
                map.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<(), StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        let now_empty = match entries.get_mut(key).map(|entry| &mut entry.value) {
            None => return Ok(()),
            Some(Value::Hash(map)) => {
                for field in fields {
                    map.remove(field);
                }
                map.is_empty()
            }
            Some(_) => return Err(wrong_type()),
        };
        // Redis drops a hash once its last field is gone.
        if now_empty {
            entries.remove(key);
        }
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
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        let Value::Hash(map) = &mut entry.value else {
            return Err(wrong_type());
        };
        map.insert(field.to_string(), value.to_string());
        for old in stale.iter().filter(|old| old.as_str() != field) {
            map.remove(old);
        }
        entry.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn sliding_window_hit(
        &self,
        key: &str,
        now_millis: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let window_millis = i64::try_from(duration_millis(window)).unwrap_or(i64::MAX);
        let cutoff = now_millis.saturating_sub(window_millis);

        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Window(Vec::new()),
            expires_at: None,
        });
        let count = match &mut entry.value {
            Value::Window(hits) => {
                hits.retain(|(score, _)| *score > cutoff);
                hits.push((now_millis, member.to_string()));
                hits.len()
            }
            _ => return Err(wrong_type()),
        };
        entry.expires_at = Some(now + window);
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
