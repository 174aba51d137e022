//! Token denylist and per-user active-token index.
//!
//! - `revoked:jti:<jti>` marks a revoked token until its own `exp`.
//! - `user_tokens:<user_id>` is a hash of `jti -> exp` used for "log out
//!   everywhere". It is capped per user; when a new token pushes it over the
//!   cap, the entries closest to expiry are revoked and dropped.
//!
//! Every mutation is one atomic store call: the index is rewritten together
//! with its TTL, and batch revocations go out as a single pipeline. A revoked
//! token may still be accepted for the length of one round trip.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::admission::rate_limit::FailurePolicy;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::{KeyValueStore, StoreError};

const REVOKED_PREFIX: &str = "revoked:jti:";
const USER_TOKENS_PREFIX: &str = "user_tokens:";
const REVOKED_MARKER: &str = "1";

fn revoked_key(jti: &str) -> String {
    format!("{REVOKED_PREFIX}{jti}")
}

fn user_tokens_key(user_id: &str) -> String {
    format!("{USER_TOKENS_PREFIX}{user_id}")
}

fn remaining(expires_at: i64, now: i64) -> Option<Duration> {
    let seconds = expires_at.checked_sub(now)?;
    u64::try_from(seconds)
        .ok()
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs)
}

fn unavailable(operation: &'static str, err: &StoreError) -> Error {
    error!(operation, "Revocation store call failed: {err}");
    Error::CircuitOpen
}

#[derive(Clone)]
pub struct RevocationRegistry {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_tokens_per_user: usize,
    failure_policy: FailurePolicy,
}

impl fmt::Debug for RevocationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationRegistry")
            .field("max_tokens_per_user", &self.max_tokens_per_user)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl RevocationRegistry {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            max_tokens_per_user: config.max_tokens_per_user().max(1),
            failure_policy: config.revocation_failure_policy(),
        }
    }

    /// Track `jti` in the user's index. Already-expired tokens are ignored.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unavailable.
    #[instrument(skip(self))]
    pub async fn register_token(
        &self,
        jti: &str,
        user_id: &str,
        expires_at: i64,
    ) -> Result<(), Error> {
        let now = self.clock.now_unix();
        if remaining(expires_at, now).is_none() {
            return Ok(());
        }
        let key = user_tokens_key(user_id);
        let index = self
            .store
            .hash_get_all(&key)
            .await
            .map_err(|err| unavailable("hash_get_all", &err))?;

        let mut stale = Vec::new();
        let mut live: Vec<(String, i64)> = Vec::new();
        for (existing, exp) in parse_index(index) {
            if existing == jti {
                continue;
            }
            if exp <= now {
                stale.push(existing);
            } else {
                live.push((existing, exp));
            }
        }

        // Room for the new token.
        let overflow = (live.len() + 1).saturating_sub(self.max_tokens_per_user);
        if overflow > 0 {
            live.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let evicted: Vec<(String, i64)> = live.drain(..overflow).collect();
            self.deny_all(&evicted, now).await?;
            warn!(
                user_id,
                evicted = evicted.len(),
                "Active token cap reached, oldest sessions revoked"
            );
            stale.extend(evicted.into_iter().map(|(old_jti, _)| old_jti));
        }

        let longest = live
            .iter()
            .map(|(_, exp)| *exp)
            .chain(std::iter::once(expires_at))
            .max()
            .unwrap_or(expires_at);
        let ttl = remaining(longest, now).unwrap_or(Duration::from_secs(1));
        self.store
            .hash_upsert(&key, jti, &expires_at.to_string(), &stale, ttl)
            .await
            .map_err(|err| unavailable("hash_upsert", &err))
    }

    /// Deny `jti` until `expires_at`. Already-expired tokens are ignored.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unavailable.
    #[instrument(skip(self))]
    pub async fn revoke_token(&self, jti: &str, expires_at: i64) -> Result<(), Error> {
        let Some(ttl) = remaining(expires_at, self.clock.now_unix()) else {
            return Ok(());
        };
        self.store
            .set_ex(&revoked_key(jti), REVOKED_MARKER, ttl)
            .await
            .map_err(|err| unavailable("set_ex", &err))
    }

    /// Put `jti` on the denylist unless it is already there.
    ///
    /// Returns `true` for exactly one of any number of concurrent callers,
    /// which makes a token redeemable once. An already-expired token is never
    /// consumed.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unavailable.
    #[instrument(skip(self))]
    pub async fn consume_once(&self, jti: &str, expires_at: i64) -> Result<bool, Error> {
        let Some(ttl) = remaining(expires_at, self.clock.now_unix()) else {
            return Ok(false);
        };
        self.store
            .set_nx(&revoked_key(jti), REVOKED_MARKER, ttl)
            .await
            .map_err(|err| unavailable("set_nx", &err))
    }

    async fn deny_all(&self, tokens: &[(String, i64)], now: i64) -> Result<(), Error> {
        let entries: Vec<(String, String, Duration)> = tokens
            .iter()
            .filter_map(|(jti, exp)| {
                remaining(*exp, now)
                    .map(|ttl| (revoked_key(jti), REVOKED_MARKER.to_string(), ttl))
            })
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        self.store
            .set_many_ex(&entries)
            .await
            .map_err(|err| unavailable("set_many_ex", &err))
    }

    /// Drop `jti` from the user's index without touching the denylist.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unavailable.
    pub async fn forget_token(&self, user_id: &str, jti: &str) -> Result<(), Error> {
        self.store
            .hash_del(&user_tokens_key(user_id), &[jti.to_string()])
            .await
            .map_err(|err| unavailable("hash_del", &err))
    }

    /// Revoke every live token in the user's index and clear it.
    ///
    /// Returns the number of tokens that were still live.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unavailable.
    #[instrument(skip(self))]
    pub async fn revoke_all_user_tokens(&self, user_id: &str) -> Result<usize, Error> {
        let now = self.clock.now_unix();
        let key = user_tokens_key(user_id);
        let index = self
            .store
            .hash_get_all(&key)
            .await
            .map_err(|err| unavailable("hash_get_all", &err))?;

        let live: Vec<(String, i64)> = parse_index(index).filter(|(_, exp)| *exp > now).collect();
        let revoked = live.len();
        self.deny_all(&live, now).await?;
        self.store
            .del(&key)
            .await
            .map_err(|err| unavailable("del", &err))?;
        info!(user_id, revoked, "Revoked all user tokens");
        Ok(revoked)
    }

    /// Whether `jti` is on the denylist.
    ///
    /// When the store cannot answer, the configured failure policy decides:
    /// fail-closed reports the token as revoked, fail-open as live.
    pub async fn is_revoked(&self, jti: &str) -> bool {
        match self.store.exists(&revoked_key(jti)).await {
            Ok(found) => found,
            Err(err) => match self.failure_policy {
                FailurePolicy::FailClosed => {
                    error!("Revocation check failed, treating token as revoked: {err}");
                    true
                }
                FailurePolicy::FailOpen => {
                    warn!("Revocation check failed, treating token as live: {err}");
                    false
                }
            },
        }
    }

    /// Live, non-revoked tokens in the user's index.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unavailable.
    pub async fn get_active_sessions(&self, user_id: &str) -> Result<usize, Error> {
        let now = self.clock.now_unix();
        let index = self
            .store
            .hash_get_all(&user_tokens_key(user_id))
            .await
            .map_err(|err| unavailable("hash_get_all", &err))?;

        let mut active = 0;
        for (jti, exp) in parse_index(index) {
            if exp <= now {
                continue;
            }
            let revoked = self
                .store
                .exists(&revoked_key(&jti))
                .await
                .map_err(|err| unavailable("exists", &err))?;
            if !revoked {
                active += 1;
            }
        }
        Ok(active)
    }
}

/// Entries with an unreadable expiry count as already expired.
fn parse_index(index: HashMap<String, String>) -> impl Iterator<Item = (String, i64)> {
    index
        .into_iter()
        .map(|(jti, exp)| (jti, exp.parse().unwrap_or(i64::MIN)))
}
