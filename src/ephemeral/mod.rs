//! Single-use, TTL-bound credentials.
//!
//! [`EphemeralTokenStore`] is the one place that implements redemption. The
//! concrete stores only choose a namespace, a TTL, an id format and a payload
//! type.
//!
//! Raw ids are only ever returned to the caller. The store key is
//! `<namespace>:<hex sha256(id)>`, so a dump of the store holds nothing
//! redeemable.

mod bot_link;
mod invite;
mod magic_link;
mod oauth_state;
mod ws_ticket;

pub use bot_link::{BotLinkPayload, BotLinkStore};
pub use invite::{InvitePayload, InviteStore};
pub use magic_link::{MagicLinkPayload, MagicLinkStore};
pub use oauth_state::{
    CodeVerifier, OAuthStateRecord, OAuthStateStore, Pkce, PkceError, code_challenge,
};
pub use ws_ticket::{WsTicket, WsTicketStore};

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::store::{KeyValueStore, StoreError};

const URL_SAFE_ID_BYTES: usize = 32;
const MAX_ID_LEN: usize = 128;

/// Shape of the ids handed out by a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdScheme {
    /// Hyphenated UUIDv4 (122 random bits).
    Uuid,
    /// 32 random bytes, base64url without padding (43 chars).
    UrlSafe,
}

impl IdScheme {
    fn generate(self) -> Result<String, Error> {
        match self {
            Self::Uuid => Ok(Uuid::new_v4().to_string()),
            Self::UrlSafe => {
                let mut bytes = [0u8; URL_SAFE_ID_BYTES];
                OsRng.try_fill_bytes(&mut bytes).map_err(|err| {
                    error!("Failed to generate ephemeral token id: {err}");
                    Error::EphemeralTokenUnavailable
                })?;
                Ok(Base64UrlUnpadded::encode_string(&bytes))
            }
        }
    }

    /// Cheap shape check so garbage never reaches the store.
    fn accepts(self, id: &str) -> bool {
        if id.is_empty() || id.len() > MAX_ID_LEN {
            return false;
        }
        match self {
            Self::Uuid => Uuid::parse_str(id).is_ok(),
            Self::UrlSafe => id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
        }
    }
}

pub struct EphemeralTokenStore<P> {
    store: Arc<dyn KeyValueStore>,
    namespace: &'static str,
    ttl: Duration,
    scheme: IdScheme,
    payload: PhantomData<fn() -> P>,
}

impl<P> Clone for EphemeralTokenStore<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace,
            ttl: self.ttl,
            scheme: self.scheme,
            payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for EphemeralTokenStore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralTokenStore")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl<P> EphemeralTokenStore<P>
where
    P: Serialize + DeserializeOwned + Send,
{
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        namespace: &'static str,
        ttl: Duration,
        scheme: IdScheme,
    ) -> Self {
        Self {
            store,
            namespace,
            ttl,
            scheme,
            payload: PhantomData,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Store `payload` under a fresh id for the default TTL.
    ///
    /// # Errors
    /// `Error::CircuitOpen` when the store breaker is open, otherwise
    /// `Error::EphemeralTokenUnavailable` if the record could not be written.
    pub async fn generate(&self, payload: &P) -> Result<String, Error> {
        self.generate_with_ttl(payload, self.ttl).await
    }

    /// # Errors
    /// Same as [`Self::generate`].
    pub async fn generate_with_ttl(&self, payload: &P, ttl: Duration) -> Result<String, Error> {
        let id = self.scheme.generate()?;
        let value = serde_json::to_string(payload).map_err(|err| {
            error!(namespace = self.namespace, "Failed to encode payload: {err}");
            Error::EphemeralTokenUnavailable
        })?;
        self.store
            .set_ex(&self.key(&id), &value, ttl)
            .await
            .map_err(|err| self.map_store_error("set", &err))?;
        debug!(namespace = self.namespace, ttl_secs = ttl.as_secs(), "Ephemeral token issued");
        Ok(id)
    }

    /// Read without consuming. Diagnostics only: never grant anything on the
    /// strength of this call.
    ///
    /// # Errors
    /// `Error::CircuitOpen` when the store breaker is open.
    pub async fn validate(&self, id: &str) -> Result<Option<P>, Error> {
        if !self.scheme.accepts(id) {
            return Ok(None);
        }
        match self.store.get(&self.key(id)).await {
            Ok(value) => Ok(value.and_then(|raw| self.decode(&raw))),
            Err(err) => self.absent_unless_open("get", &err),
        }
    }

    /// Atomically read and delete. Of any number of concurrent callers with
    /// the same id, at most one receives `Some`.
    ///
    /// # Errors
    /// `Error::CircuitOpen` when the store breaker is open.
    pub async fn validate_and_consume(&self, id: &str) -> Result<Option<P>, Error> {
        if !self.scheme.accepts(id) {
            return Ok(None);
        }
        match self.store.get_del(&self.key(id)).await {
            Ok(value) => Ok(value.and_then(|raw| self.decode(&raw))),
            Err(err) => self.absent_unless_open("get_del", &err),
        }
    }

    /// Invalidate `id` without reading it. Returns whether a live record was removed.
    ///
    /// # Errors
    /// `Error::CircuitOpen` when the store breaker is open, otherwise
    /// `Error::EphemeralTokenUnavailable` if the delete failed.
    pub async fn revoke(&self, id: &str) -> Result<bool, Error> {
        if !self.scheme.accepts(id) {
            return Ok(false);
        }
        self.store
            .del(&self.key(id))
            .await
            .map_err(|err| self.map_store_error("del", &err))
    }

    fn key(&self, id: &str) -> String {
        let digest = Sha256::digest(id.as_bytes());
        format!("{}:{}", self.namespace, hex::encode(digest))
    }

    fn decode(&self, raw: &str) -> Option<P> {
        match serde_json::from_str(raw) {
            Ok(payload) => Some(payload),
            Err(err) => {
                error!(namespace = self.namespace, "Discarding undecodable payload: {err}");
                None
            }
        }
    }

    fn map_store_error(&self, operation: &'static str, err: &StoreError) -> Error {
        warn!(namespace = self.namespace, operation, "Ephemeral store call failed: {err}");
        match err {
            StoreError::CircuitOpen => Error::CircuitOpen,
            _ => Error::EphemeralTokenUnavailable,
        }
    }

    fn absent_unless_open(
        &self,
        operation: &'static str,
        err: &StoreError,
    ) -> Result<Option<P>, Error> {
        match self.map_store_error(operation, err) {
            Error::CircuitOpen => Err(Error::CircuitOpen),
            _ => Ok(None),
        }
    }
}
