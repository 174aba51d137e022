//! `OAuth` CSRF state with optional `PKCE` (RFC 7636).
//!
//! Only the state and verifier bookkeeping lives here; the authorization
//! code exchange belongs to the provider client.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use super::{EphemeralTokenStore, IdScheme};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::KeyValueStore;

const NAMESPACE: &str = "oauth_state";
pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;
/// 48 bytes encode to 64 base64url characters.
const GENERATED_VERIFIER_BYTES: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PkceError {
    #[error("code verifier must be {MIN_VERIFIER_LEN} to {MAX_VERIFIER_LEN} characters, got {0}")]
    Length(usize),
    #[error("code verifier contains characters outside [A-Za-z0-9-._~]")]
    Charset,
    #[error("failed to generate code verifier")]
    Rng,
}

/// A `code_verifier` that has passed the RFC 7636 §4.1 checks.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeVerifier(String);

impl CodeVerifier {
    /// # Errors
    /// Returns a [`PkceError`] for a verifier of the wrong length or charset.
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        let len = verifier.len();
        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
            return Err(PkceError::Length(len));
        }
        if !verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
        {
            return Err(PkceError::Charset);
        }
        Ok(Self(verifier))
    }

    /// # Errors
    /// Returns `PkceError::Rng` if the OS random source fails.
    pub fn generate() -> Result<Self, PkceError> {
        let mut bytes = [0u8; GENERATED_VERIFIER_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| PkceError::Rng)?;
        Ok(Self(Base64UrlUnpadded::encode_string(&bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn challenge(&self) -> String {
        code_challenge(&self.0)
    }
}

impl fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodeVerifier(***)")
    }
}

/// `S256` challenge: `BASE64URL-NOPAD(SHA256(verifier))`.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()))
}

/// How to set up `PKCE` for a new state.
#[derive(Clone, Debug)]
pub enum Pkce {
    /// Generate a verifier server-side.
    Generate,
    /// Use a verifier supplied by the client.
    Verifier(CodeVerifier),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateRecord {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Present only when `PKCE` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct OAuthStateStore {
    tokens: EphemeralTokenStore<OAuthStateRecord>,
    clock: Arc<dyn Clock>,
}

impl OAuthStateStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.oauth_state_ttl_seconds());
        Self {
            tokens: EphemeralTokenStore::new(store, NAMESPACE, ttl, IdScheme::UrlSafe),
            clock,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.tokens.ttl()
    }

    /// Returns the state and, when `pkce` is set, the `S256` code challenge.
    ///
    /// # Errors
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` if the state
    /// could not be stored or a verifier could not be generated.
    pub async fn generate(
        &self,
        provider: &str,
        user_id: Option<&str>,
        ip: Option<&str>,
        pkce: Option<Pkce>,
    ) -> Result<(String, Option<String>), Error> {
        let verifier = match pkce {
            None => None,
            Some(Pkce::Verifier(verifier)) => Some(verifier),
            Some(Pkce::Generate) => Some(CodeVerifier::generate().map_err(|err| {
                warn!(provider, "{err}");
                Error::EphemeralTokenUnavailable
            })?),
        };
        let challenge = verifier.as_ref().map(CodeVerifier::challenge);
        let record = OAuthStateRecord {
            provider: provider.to_string(),
            user_id: user_id.map(str::to_string),
            ip: ip.map(str::to_string),
            code_verifier: verifier.map(|v| v.0),
            created_at: self.clock.now_unix(),
        };
        let state = self.tokens.generate(&record).await?;
        Ok((state, challenge))
    }

    /// Consume `state` and check it against the callback.
    ///
    /// The state is spent even when the checks fail, so a mismatched callback
    /// cannot be retried. A different provider, or a different user when the
    /// state was bound to one, is rejected. A different IP is only logged.
    ///
    /// # Errors
    /// `Error::EphemeralTokenUnavailable` if the state is unknown, expired,
    /// already used or fails the binding checks.
    pub async fn validate_and_consume(
        &self,
        state: &str,
        provider: &str,
        user_id: Option<&str>,
        ip: Option<&str>,
    ) -> Result<OAuthStateRecord, Error> {
        let record = self
            .tokens
            .validate_and_consume(state)
            .await?
            .ok_or(Error::EphemeralTokenUnavailable)?;

        if record.provider != provider {
            warn!(expected = %record.provider, got = provider, "OAuth state provider mismatch");
            return Err(Error::EphemeralTokenUnavailable);
        }
        if let Some(bound) = record.user_id.as_deref() {
            if user_id != Some(bound) {
                warn!(provider, "OAuth state user mismatch");
                return Err(Error::EphemeralTokenUnavailable);
            }
        }
        if let (Some(original), Some(current)) = (record.ip.as_deref(), ip) {
            if original != current {
                warn!(
                    provider,
                    original_ip = original,
                    current_ip = current,
                    "OAuth state IP changed"
                );
            }
        }
        Ok(record)
    }
}
