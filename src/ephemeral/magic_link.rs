use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{EphemeralTokenStore, IdScheme};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::KeyValueStore;

const NAMESPACE: &str = "magic_link";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicLinkPayload {
    pub user_id: String,
    /// Address the link was mailed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: i64,
}

/// Passwordless sign-in links (5 min by default).
#[derive(Clone, Debug)]
pub struct MagicLinkStore {
    tokens: EphemeralTokenStore<MagicLinkPayload>,
    clock: Arc<dyn Clock>,
}

impl MagicLinkStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.magic_link_ttl_seconds());
        Self {
            tokens: EphemeralTokenStore::new(store, NAMESPACE, ttl, IdScheme::UrlSafe),
            clock,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.tokens.ttl()
    }

    /// # Errors
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` if the link
    /// could not be stored.
    pub async fn create(&self, user_id: &str, email: Option<&str>) -> Result<String, Error> {
        let payload = MagicLinkPayload {
            user_id: user_id.to_string(),
            email: email.map(str::to_string),
            created_at: self.clock.now_unix(),
        };
        self.tokens.generate(&payload).await
    }

    /// # Errors
    /// `Error::EphemeralTokenUnavailable` if the link is unknown, expired or
    /// already used.
    pub async fn redeem(&self, token: &str) -> Result<MagicLinkPayload, Error> {
        self.tokens
            .validate_and_consume(token)
            .await?
            .ok_or(Error::EphemeralTokenUnavailable)
    }

    /// # Errors
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` on store failure.
    pub async fn revoke(&self, token: &str) -> Result<bool, Error> {
        self.tokens.revoke(token).await
    }
}
