//! Engine facade: one value wiring every component around a shared store
//! breaker, built once at startup and shared by reference.

mod session;

pub use session::{SessionOptions, TokenPair};

use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::admission::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::admission::rate_limit::{
    RateLimitAction, RateLimitKey, RateLimiter, SlidingWindowRateLimiter,
};
use crate::clock::Clock;
use crate::config::{ConfigError, EngineConfig};
use crate::ephemeral::{BotLinkStore, InviteStore, MagicLinkStore, OAuthStateStore, WsTicketStore};
use crate::error::Error;
use crate::external::TelegramValidator;
use crate::revocation::RevocationRegistry;
use crate::store::{GuardedStore, KeyValueStore};
use crate::token::{TokenCodec, TokenIssuer};
use crate::topics::TopicAuthorizer;

const STORE_BREAKER: &str = "kv-store";

pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: GuardedStore,
    codec: Arc<TokenCodec>,
    issuer: TokenIssuer,
    revocation: RevocationRegistry,
    invites: InviteStore,
    oauth_states: OAuthStateStore,
    ws_tickets: WsTicketStore,
    magic_links: MagicLinkStore,
    bot_links: BotLinkStore,
    telegram: Option<TelegramValidator>,
    rate_limiter: SlidingWindowRateLimiter,
    topics: TopicAuthorizer,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("environment", &self.config.environment())
            .field("store", &self.store)
            .field("telegram", &self.telegram.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate `config` and wire every component to `store` through one
    /// circuit breaker.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the configuration is unsafe to serve with.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::from_config(STORE_BREAKER, &config));
        let guarded = GuardedStore::new(store, breaker, config.store_timeout());
        let shared: Arc<dyn KeyValueStore> = Arc::new(guarded.clone());

        let codec = Arc::new(TokenCodec::from_config(&config));
        let issuer = TokenIssuer::new(codec.clone(), clock.clone(), &config);

        let engine = Self {
            revocation: RevocationRegistry::new(shared.clone(), clock.clone(), &config),
            invites: InviteStore::new(shared.clone(), clock.clone(), &config),
            oauth_states: OAuthStateStore::new(shared.clone(), clock.clone(), &config),
            ws_tickets: WsTicketStore::new(shared.clone(), clock.clone(), &config),
            magic_links: MagicLinkStore::new(shared.clone(), clock.clone(), &config),
            bot_links: BotLinkStore::new(shared.clone(), clock.clone(), &config),
            telegram: TelegramValidator::from_config(&config, clock.clone()),
            rate_limiter: SlidingWindowRateLimiter::new(shared, clock.clone(), &config),
            topics: TopicAuthorizer::new(),
            store: guarded,
            codec,
            issuer,
            clock,
            config,
        };
        info!(
            environment = %engine.config.environment(),
            algorithm = %engine.config.jwt_algorithm(),
            telegram = engine.telegram.is_some(),
            "Credential engine ready"
        );
        Ok(engine)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn revocation(&self) -> &RevocationRegistry {
        &self.revocation
    }

    #[must_use]
    pub fn invites(&self) -> &InviteStore {
        &self.invites
    }

    #[must_use]
    pub fn oauth_states(&self) -> &OAuthStateStore {
        &self.oauth_states
    }

    #[must_use]
    pub fn ws_tickets(&self) -> &WsTicketStore {
        &self.ws_tickets
    }

    #[must_use]
    pub fn magic_links(&self) -> &MagicLinkStore {
        &self.magic_links
    }

    #[must_use]
    pub fn bot_links(&self) -> &BotLinkStore {
        &self.bot_links
    }

    /// `None` when no Telegram bot token is configured.
    #[must_use]
    pub fn telegram(&self) -> Option<&TelegramValidator> {
        self.telegram.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &SlidingWindowRateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub fn topics(&self) -> &TopicAuthorizer {
        &self.topics
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        self.store.breaker()
    }

    #[must_use]
    pub fn store_state(&self) -> CircuitState {
        self.breaker().state()
    }

    /// Ping the store through the breaker.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the store is unreachable or the breaker is open.
    pub async fn ping_store(&self) -> Result<(), Error> {
        self.store.ping().await.map_err(|err| {
            tracing::warn!("Store ping failed: {err}");
            Error::CircuitOpen
        })
    }

    /// # Errors
    /// `Error::RateLimited` when `key` is over the limit for `action`.
    pub async fn check_rate_limit(
        &self,
        key: &RateLimitKey,
        action: RateLimitAction,
    ) -> Result<(), Error> {
        self.rate_limiter.check(key, action).await.into_result()
    }

    fn now(&self) -> i64 {
        self.clock.now_unix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Environment;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use secrecy::SecretString;

    #[test]
    fn weak_secret_is_fatal_in_production() {
        let config = EngineConfig::new(SecretString::from("changeme".to_string()))
            .with_environment(Environment::Production);
        let engine = Engine::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(engine.err(), Some(ConfigError::WeakSecret));
    }

    #[tokio::test]
    async fn store_outage_opens_shared_breaker() -> Result<()> {
        let memory = Arc::new(MemoryStore::new());
        let config = EngineConfig::new(SecretString::from("k".repeat(16) + &"v".repeat(24)))
            .with_breaker(2, std::time::Duration::from_secs(30));
        let engine = Engine::new(
            config,
            memory.clone(),
            Arc::new(ManualClock::new(1_700_000_000)),
        )?;
        assert!(engine.telegram().is_none());
        engine.ping_store().await?;

        memory.set_unavailable(true);
        assert_eq!(engine.ping_store().await, Err(Error::CircuitOpen));
        assert_eq!(engine.ping_store().await, Err(Error::CircuitOpen));
        assert_eq!(engine.store_state(), CircuitState::Open);

        // Every component shares the breaker.
        assert_eq!(
            engine.invites().create(crate::token::Role::User, None, "a").await,
            Err(Error::CircuitOpen)
        );
        Ok(())
    }
}
