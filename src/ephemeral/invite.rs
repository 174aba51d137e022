use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{EphemeralTokenStore, IdScheme};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::KeyValueStore;
use crate::token::Role;

const NAMESPACE: &str = "invite";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitePayload {
    /// Role granted to whoever redeems the invite.
    pub role: Role,
    /// Address the invite was sent to, shown as a hint on the signup form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_hint: Option<String>,
    /// Id of the user who created the invite.
    pub issued_by: String,
    pub created_at: i64,
}

/// Invite codes (UUIDv4, 24h by default).
#[derive(Clone, Debug)]
pub struct InviteStore {
    tokens: EphemeralTokenStore<InvitePayload>,
    clock: Arc<dyn Clock>,
}

impl InviteStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.invite_ttl_seconds());
        Self {
            tokens: EphemeralTokenStore::new(store, NAMESPACE, ttl, IdScheme::Uuid),
            clock,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.tokens.ttl()
    }

    /// # Errors
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` if the
    /// invite could not be stored.
    pub async fn create(
        &self,
        role: Role,
        email_hint: Option<String>,
        issued_by: &str,
    ) -> Result<String, Error> {
        self.create_with_ttl(role, email_hint, issued_by, self.ttl())
            .await
    }

    /// # Errors
    /// Same as [`Self::create`].
    pub async fn create_with_ttl(
        &self,
        role: Role,
        email_hint: Option<String>,
        issued_by: &str,
        ttl: Duration,
    ) -> Result<String, Error> {
        let payload = InvitePayload {
            role,
            email_hint,
            issued_by: issued_by.to_string(),
            created_at: self.clock.now_unix(),
        };
        let code = self.tokens.generate_with_ttl(&payload, ttl).await?;
        info!(issued_by, role = %role, "Invite created");
        Ok(code)
    }

    /// Look at an invite without redeeming it, e.g. to prefill a signup form.
    ///
    /// # Errors
    /// `Error::EphemeralTokenUnavailable` if the code is unknown, expired or
    /// already redeemed.
    pub async fn peek(&self, code: &str) -> Result<InvitePayload, Error> {
        self.tokens
            .validate(code)
            .await?
            .ok_or(Error::EphemeralTokenUnavailable)
    }

    /// Redeem once.
    ///
    /// # Errors
    /// `Error::EphemeralTokenUnavailable` if the code is unknown, expired or
    /// already redeemed.
    pub async fn redeem(&self, code: &str) -> Result<InvitePayload, Error> {
        let payload = self
            .tokens
            .validate_and_consume(code)
            .await?
            .ok_or(Error::EphemeralTokenUnavailable)?;
        info!(issued_by = %payload.issued_by, role = %payload.role, "Invite redeemed");
        Ok(payload)
    }

    /// Cancel an outstanding invite.
    ///
    /// # Errors
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` on store failure.
    pub async fn revoke(&self, code: &str) -> Result<bool, Error> {
        self.tokens.revoke(code).await
    }
}
