//! Telegram bot deep-link tokens.
//!
//! A signed-in web user asks for a link, opens `https://t.me/<bot>?start=<token>`
//! and the bot redeems the token from the `/start` command to bind the chat to
//! the account. The ids are 43 characters of `[A-Za-z0-9_-]`, which fits
//! Telegram's 64-character start parameter.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{EphemeralTokenStore, IdScheme};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::KeyValueStore;

const NAMESPACE: &str = "bot_link";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotLinkPayload {
    pub user_id: String,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct BotLinkStore {
    tokens: EphemeralTokenStore<BotLinkPayload>,
    clock: Arc<dyn Clock>,
}

impl BotLinkStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.bot_link_ttl_seconds());
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
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` if the token
    /// could not be stored.
    pub async fn create(&self, user_id: &str) -> Result<String, Error> {
        let payload = BotLinkPayload {
            user_id: user_id.to_string(),
            created_at: self.clock.now_unix(),
        };
        self.tokens.generate(&payload).await
    }

    /// # Errors
    /// `Error::EphemeralTokenUnavailable` if the token is unknown, expired or
    /// already used.
    pub async fn redeem(&self, token: &str) -> Result<BotLinkPayload, Error> {
        self.tokens
            .validate_and_consume(token)
            .await?
            .ok_or(Error::EphemeralTokenUnavailable)
    }

    /// `https://t.me/<bot>?start=<token>`; a leading `@` on the bot name is dropped.
    #[must_use]
    pub fn deep_link(bot_username: &str, token: &str) -> String {
        let bot = bot_username.trim().trim_start_matches('@');
        format!("https://t.me/{bot}?start={token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use secrecy::SecretString;

    #[tokio::test]
    async fn bot_link_round_trip() -> Result<()> {
        let config = EngineConfig::new(SecretString::from("x".repeat(40)));
        let links = BotLinkStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1_700_000_000)),
            &config,
        );
        assert_eq!(links.ttl(), Duration::from_secs(300));

        let token = links.create("42").await?;
        assert!(token.len() <= 64);
        assert!(
            token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );

        assert_eq!(links.redeem(&token).await?.user_id, "42");
        assert_eq!(
            links.redeem(&token).await,
            Err(Error::EphemeralTokenUnavailable)
        );
        Ok(())
    }

    #[test]
    fn deep_link_format() {
        assert_eq!(
            BotLinkStore::deep_link("@vpn_bot", "abc_123"),
            "https://t.me/vpn_bot?start=abc_123"
        );
        assert_eq!(
            BotLinkStore::deep_link("vpn_bot", "t"),
            "https://t.me/vpn_bot?start=t"
        );
    }
}
