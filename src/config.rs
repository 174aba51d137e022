//! Engine configuration.
//!
//! One value is built at startup, validated, and handed to every component.
//! Nothing reads settings from globals after that.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::admission::rate_limit::{FailurePolicy, RateLimitAction, RateLimitRule};
use crate::token::Algorithm;

pub const MIN_SECRET_BYTES: usize = 32;

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_REFRESH_REMEMBER_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
pub const DEFAULT_TWO_FACTOR_TTL_SECONDS: i64 = 5 * 60;
pub const DEFAULT_MAX_TOKENS_PER_USER: usize = 50;
pub const DEFAULT_TELEGRAM_MAX_AGE_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_MINIAPP_FUTURE_TOLERANCE_SECONDS: i64 = 5 * 60;
pub const DEFAULT_INVITE_TTL_SECONDS: u64 = 24 * 60 * 60;
pub const DEFAULT_OAUTH_STATE_TTL_SECONDS: u64 = 10 * 60;
pub const DEFAULT_WS_TICKET_TTL_SECONDS: u64 = 30;
pub const DEFAULT_MAGIC_LINK_TTL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_BOT_LINK_TTL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// Values that show up in tutorials and `.env.example` files.
const KNOWN_WEAK_SECRETS: &[&str] = &[
    "secret",
    "changeme",
    "change-me",
    "change_me",
    "your-secret-key",
    "your_secret_key",
    "supersecret",
    "super-secret-key",
    "jwt-secret",
    "jwt_secret",
    "development-secret-key-change-in-production",
    "change-this-secret-key-in-production-environment",
    "0123456789abcdef0123456789abcdef",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("signing secret is missing")]
    MissingSecret,
    #[error("signing secret must be at least {min} bytes")]
    SecretTooShort { min: usize },
    #[error("signing secret is a known weak value")]
    WeakSecret,
    #[error("algorithm allow-list is empty")]
    EmptyAllowList,
    #[error("signing algorithm {0} is not in the allow-list")]
    AlgorithmNotAllowed(Algorithm),
    #[error("invalid ttl for {0}")]
    InvalidTtl(&'static str),
    #[error("circuit breaker failure threshold must be positive")]
    InvalidBreakerThreshold,
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    environment: Environment,
    jwt_secret: SecretString,
    jwt_algorithm: Algorithm,
    allowed_algorithms: Vec<Algorithm>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    refresh_remember_ttl_seconds: i64,
    two_factor_ttl_seconds: i64,
    max_tokens_per_user: usize,
    strict_fingerprint: bool,
    revocation_failure_policy: FailurePolicy,
    telegram_bot_token: Option<SecretString>,
    telegram_max_age_seconds: i64,
    miniapp_future_tolerance_seconds: i64,
    invite_ttl_seconds: u64,
    oauth_state_ttl_seconds: u64,
    ws_ticket_ttl_seconds: u64,
    magic_link_ttl_seconds: u64,
    bot_link_ttl_seconds: u64,
    store_timeout: Duration,
    breaker_failure_threshold: u32,
    breaker_cooldown: Duration,
    rate_limit_rules: HashMap<RateLimitAction, RateLimitRule>,
}

impl EngineConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            environment: Environment::default(),
            jwt_secret,
            jwt_algorithm: Algorithm::HS256,
            allowed_algorithms: vec![Algorithm::HS256],
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            refresh_remember_ttl_seconds: DEFAULT_REFRESH_REMEMBER_TTL_SECONDS,
            two_factor_ttl_seconds: DEFAULT_TWO_FACTOR_TTL_SECONDS,
            max_tokens_per_user: DEFAULT_MAX_TOKENS_PER_USER,
            strict_fingerprint: false,
            revocation_failure_policy: FailurePolicy::FailClosed,
            telegram_bot_token: None,
            telegram_max_age_seconds: DEFAULT_TELEGRAM_MAX_AGE_SECONDS,
            miniapp_future_tolerance_seconds: DEFAULT_MINIAPP_FUTURE_TOLERANCE_SECONDS,
            invite_ttl_seconds: DEFAULT_INVITE_TTL_SECONDS,
            oauth_state_ttl_seconds: DEFAULT_OAUTH_STATE_TTL_SECONDS,
            ws_ticket_ttl_seconds: DEFAULT_WS_TICKET_TTL_SECONDS,
            magic_link_ttl_seconds: DEFAULT_MAGIC_LINK_TTL_SECONDS,
            bot_link_ttl_seconds: DEFAULT_BOT_LINK_TTL_SECONDS,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown: DEFAULT_BREAKER_COOLDOWN,
            rate_limit_rules: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_jwt_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.jwt_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_two_factor_ttl_seconds(mut self, seconds: i64) -> Self {
        self.two_factor_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_tokens_per_user(mut self, max: usize) -> Self {
        self.max_tokens_per_user = max;
        self
    }

    #[must_use]
    pub fn with_strict_fingerprint(mut self, strict: bool) -> Self {
        self.strict_fingerprint = strict;
        self
    }

    #[must_use]
    pub fn with_revocation_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.revocation_failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_telegram_bot_token(mut self, token: SecretString) -> Self {
        self.telegram_bot_token = Some(token);
        self
    }

    #[must_use]
    pub fn with_telegram_max_age_seconds(mut self, seconds: i64) -> Self {
        self.telegram_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_miniapp_future_tolerance_seconds(mut self, seconds: i64) -> Self {
        self.miniapp_future_tolerance_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_invite_ttl_seconds(mut self, seconds: u64) -> Self {
        self.invite_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_oauth_state_ttl_seconds(mut self, seconds: u64) -> Self {
        self.oauth_state_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_ws_ticket_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ws_ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_magic_link_ttl_seconds(mut self, seconds: u64) -> Self {
        self.magic_link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bot_link_ttl_seconds(mut self, seconds: u64) -> Self {
        self.bot_link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.breaker_failure_threshold = failure_threshold;
        self.breaker_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_rate_limit_rule(mut self, action: RateLimitAction, rule: RateLimitRule) -> Self {
        self.rate_limit_rules.insert(action, rule);
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub(crate) fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn jwt_algorithm(&self) -> Algorithm {
        self.jwt_algorithm
    }

    #[must_use]
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn refresh_remember_ttl_seconds(&self) -> i64 {
        self.refresh_remember_ttl_seconds
    }

    #[must_use]
    pub fn two_factor_ttl_seconds(&self) -> i64 {
        self.two_factor_ttl_seconds
    }

    #[must_use]
    pub fn max_tokens_per_user(&self) -> usize {
        self.max_tokens_per_user
    }

    #[must_use]
    pub fn strict_fingerprint(&self) -> bool {
        self.strict_fingerprint
    }

    #[must_use]
    pub fn revocation_failure_policy(&self) -> FailurePolicy {
        self.revocation_failure_policy
    }

    pub(crate) fn telegram_bot_token(&self) -> Option<&SecretString> {
        self.telegram_bot_token.as_ref()
    }

    #[must_use]
    pub fn telegram_max_age_seconds(&self) -> i64 {
        self.telegram_max_age_seconds
    }

    #[must_use]
    pub fn miniapp_future_tolerance_seconds(&self) -> i64 {
        self.miniapp_future_tolerance_seconds
    }

    #[must_use]
    pub fn invite_ttl_seconds(&self) -> u64 {
        self.invite_ttl_seconds
    }

    #[must_use]
    pub fn oauth_state_ttl_seconds(&self) -> u64 {
        self.oauth_state_ttl_seconds
    }

    #[must_use]
    pub fn ws_ticket_ttl_seconds(&self) -> u64 {
        self.ws_ticket_ttl_seconds
    }

    #[must_use]
    pub fn magic_link_ttl_seconds(&self) -> u64 {
        self.magic_link_ttl_seconds
    }

    #[must_use]
    pub fn bot_link_ttl_seconds(&self) -> u64 {
        self.bot_link_ttl_seconds
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn breaker_failure_threshold(&self) -> u32 {
        self.breaker_failure_threshold
    }

    #[must_use]
    pub fn breaker_cooldown(&self) -> Duration {
        self.breaker_cooldown
    }

    /// Configured rule for `action`, falling back to its default.
    #[must_use]
    pub fn rate_limit_rule(&self, action: RateLimitAction) -> RateLimitRule {
        self.rate_limit_rules
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.default_rule())
    }

    /// Check the configuration before any traffic is served.
    ///
    /// In development a short or well-known secret only logs a warning so
    /// local setups keep working; in production it is fatal.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_secret()?;

        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }
        if !self.allowed_algorithms.contains(&self.jwt_algorithm) {
            return Err(ConfigError::AlgorithmNotAllowed(self.jwt_algorithm));
        }

        let ttls = [
            ("access token", self.access_ttl_seconds),
            ("refresh token", self.refresh_ttl_seconds),
            ("remember-me refresh token", self.refresh_remember_ttl_seconds),
            ("2fa pending token", self.two_factor_ttl_seconds),
            ("telegram max age", self.telegram_max_age_seconds),
        ];
        for (name, ttl) in ttls {
            if ttl <= 0 {
                return Err(ConfigError::InvalidTtl(name));
            }
        }
        if self.miniapp_future_tolerance_seconds < 0 {
            return Err(ConfigError::InvalidTtl("mini-app future tolerance"));
        }
        if self.access_ttl_seconds >= self.refresh_ttl_seconds {
            return Err(ConfigError::InvalidTtl("access token"));
        }

        let ephemeral_ttls = [
            ("invite", self.invite_ttl_seconds),
            ("oauth state", self.oauth_state_ttl_seconds),
            ("ws ticket", self.ws_ticket_ttl_seconds),
            ("magic link", self.magic_link_ttl_seconds),
            ("bot link", self.bot_link_ttl_seconds),
        ];
        for (name, ttl) in ephemeral_ttls {
            if ttl == 0 {
                return Err(ConfigError::InvalidTtl(name));
            }
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidTtl("store timeout"));
        }

        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::InvalidBreakerThreshold);
        }

        Ok(())
    }

    fn validate_secret(&self) -> Result<(), ConfigError> {
        let secret = self.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        let problem = if is_known_weak(secret) {
            Some(ConfigError::WeakSecret)
        } else if secret.len() < MIN_SECRET_BYTES {
            Some(ConfigError::SecretTooShort {
                min: MIN_SECRET_BYTES,
            })
        } else {
            None
        };

        match (problem, self.environment) {
            (None, _) => Ok(()),
            (Some(err), Environment::Production) => Err(err),
            (Some(err), Environment::Development) => {
                warn!("Accepting signing secret outside production: {err}");
                Ok(())
            }
        }
    }
}

fn is_known_weak(secret: &str) -> bool {
    let lowered = secret.trim().to_lowercase();
    if KNOWN_WEAK_SECRETS.contains(&lowered.as_str()) {
        return true;
    }
    // A single repeated character carries no entropy regardless of length.
    let mut chars = lowered.chars();
    chars
        .next()
        .is_some_and(|first| chars.all(|c| c == first))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: &str = "k3P9vQz7Lm2Xw8Rt5Yb1Nc6Hd4Jf0Gs9Ea7Uo3Ii";

    fn production(secret: &str) -> EngineConfig {
        EngineConfig::new(SecretString::from(secret.to_string()))
            .with_environment(Environment::Production)
    }

    #[test]
    fn engine_config_defaults_and_overrides() {
        let config = EngineConfig::new(SecretString::from(STRONG.to_string()));
        assert_eq!(config.access_ttl_seconds(), DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(config.refresh_ttl_seconds(), DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(config.invite_ttl_seconds(), 24 * 60 * 60);
        assert_eq!(config.ws_ticket_ttl_seconds(), 30);
        assert_eq!(config.revocation_failure_policy(), FailurePolicy::FailClosed);

        let config = config
            .with_access_ttl_seconds(60)
            .with_ws_ticket_ttl_seconds(10)
            .with_strict_fingerprint(true);
        assert_eq!(config.access_ttl_seconds(), 60);
        assert_eq!(config.ws_ticket_ttl_seconds(), 10);
        assert!(config.strict_fingerprint());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn production_rejects_short_secret() {
        assert_eq!(
            production("short-but-random-Xq9").validate(),
            Err(ConfigError::SecretTooShort {
                min: MIN_SECRET_BYTES
            })
        );
    }

    #[test]
    fn production_rejects_known_weak_secret() {
        assert_eq!(
            production("development-secret-key-change-in-production").validate(),
            Err(ConfigError::WeakSecret)
        );
        assert_eq!(
            production(&"a".repeat(64)).validate(),
            Err(ConfigError::WeakSecret)
        );
    }

    #[test]
    fn development_tolerates_weak_secret() {
        let config = EngineConfig::new(SecretString::from("secret".to_string()));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn empty_secret_is_always_fatal() {
        let config = EngineConfig::new(SecretString::from(String::new()));
        assert_eq!(config.validate(), Err(ConfigError::MissingSecret));
    }

    #[test]
    fn signing_algorithm_must_be_allowed() {
        let config = production(STRONG)
            .with_jwt_algorithm(Algorithm::HS512)
            .with_allowed_algorithms(vec![Algorithm::HS256]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::AlgorithmNotAllowed(Algorithm::HS512))
        );

        let config = production(STRONG).with_allowed_algorithms(Vec::new());
        assert_eq!(config.validate(), Err(ConfigError::EmptyAllowList));
    }

    #[test]
    fn access_ttl_must_be_shorter_than_refresh() {
        let config = production(STRONG).with_access_ttl_seconds(DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTtl("access token"))
        );
    }

    #[test]
    fn environment_parses() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Development));
        assert!("staging-ish".parse::<Environment>().is_err());
    }

    #[test]
    fn rate_limit_rule_falls_back_to_default() {
        let config = EngineConfig::new(SecretString::from(STRONG.to_string()));
        assert_eq!(
            config.rate_limit_rule(RateLimitAction::Login),
            RateLimitAction::Login.default_rule()
        );

        let custom = RateLimitRule::new(1, Duration::from_secs(10), FailurePolicy::FailOpen);
        let config = config.with_rate_limit_rule(RateLimitAction::Login, custom);
        assert_eq!(config.rate_limit_rule(RateLimitAction::Login), custom);
    }
}
